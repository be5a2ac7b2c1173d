use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    BranchAdmin,
    Registrar,
    Cashier,
    Librarian,
    Teacher,
    Parent,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Self::SuperAdmin),
            "branch_admin" => Some(Self::BranchAdmin),
            "registrar" => Some(Self::Registrar),
            "cashier" => Some(Self::Cashier),
            "librarian" => Some(Self::Librarian),
            "teacher" => Some(Self::Teacher),
            "parent" => Some(Self::Parent),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::BranchAdmin => "branch_admin",
            Self::Registrar => "registrar",
            Self::Cashier => "cashier",
            Self::Librarian => "librarian",
            Self::Teacher => "teacher",
            Self::Parent => "parent",
            Self::Student => "student",
        }
    }
}

/// Caller context carried on every gated request. The portal has no session
/// layer; the role/branch pair is checked before any query runs.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Option<String>,
    pub role: Role,
    pub branch_id: Option<String>,
}
