pub mod delete_travel;
