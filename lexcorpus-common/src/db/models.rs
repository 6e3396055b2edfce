//! Database models

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Jurisdiction {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub name_long: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Court {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub name_abbreviation: Option<String>,
    pub jurisdiction_id: Option<i64>,
    pub jurisdiction_slug: Option<String>,
}

/// Case metadata as served by search and listings; the denormalized
/// jurisdiction_*/court_* columns avoid joins on the hot read path
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CaseMetadata {
    pub id: i64,
    pub name_abbreviation: String,
    pub decision_date: Option<NaiveDate>,
    pub jurisdiction_id: Option<i64>,
    pub jurisdiction_slug: Option<String>,
    pub jurisdiction_name: Option<String>,
    pub court_id: Option<i64>,
    pub court_slug: Option<String>,
    pub court_name: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
