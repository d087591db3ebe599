pub mod feedback;
pub mod health;
pub mod insights;
pub mod matches;
pub mod weights;
