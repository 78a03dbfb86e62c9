//! Exam seating allocation: timetable rows in, hall/seat assignments and a
//! two-sheet workbook out.

pub mod allocate;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod report;
pub mod store;
pub mod summary;

pub use allocate::DEFAULT_HALL_CAPACITY;
pub use engine::run_allocation;
pub use error::SeatingError;
pub use normalize::RawRow;
