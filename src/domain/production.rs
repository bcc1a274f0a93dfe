use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Admin-authored production progress entry. Append-mostly; the customer
/// view only includes entries flagged `visible_to_customer`.
#[derive(Debug, Clone)]
pub struct ProductionUpdate {
    pub id: Uuid,
    pub order_id: Uuid,
    pub stage: String,
    pub status: String,
    pub description: String,
    pub photos: Vec<String>,
    pub visible_to_customer: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProductionUpdate {
    pub stage: String,
    pub status: String,
    pub description: String,
    pub photos: Vec<String>,
    pub visible_to_customer: bool,
    pub created_by: String,
}
