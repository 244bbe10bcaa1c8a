pub mod daily_facts;
pub mod dimension_update;
