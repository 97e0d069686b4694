use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementType {
    Class,
    Teacher,
    Subject,
    Room,
    Student,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Class => "CLASS",
            ElementType::Teacher => "TEACHER",
            ElementType::Subject => "SUBJECT",
            ElementType::Room => "ROOM",
            ElementType::Student => "STUDENT",
        };
        f.write_str(name)
    }
}

/// A single entry of a school's master data a timetable can be requested for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimetableElement {
    pub element_type: ElementType,
    pub id: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub profile_name: String,
    pub api_url: String,
    pub user_name: Option<String>,  // None for anonymous logins
    pub key: Option<String>,
    pub personal_timetable: Option<TimetableElement>,
}
