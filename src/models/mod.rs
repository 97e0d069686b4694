mod user;
mod task;
mod timetable;

pub use user::{User, TimetableElement, ElementType};
pub use task::{TaskRequest, TaskKind, TaskStatus};
pub use timetable::{Timetable, Period};
