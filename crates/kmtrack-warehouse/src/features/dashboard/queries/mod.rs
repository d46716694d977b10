pub mod cost_evolution;
pub mod travel_summary;
