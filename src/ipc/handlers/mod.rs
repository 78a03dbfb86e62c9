pub mod core;
pub mod hall_tickets;
pub mod seating;
