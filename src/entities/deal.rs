use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Canonical deal, unique on (company_name, news_date).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "deals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i32,
    #[sea_orm(unique)]
    pub number: i32,
    pub company_name: String,
    pub ceo: Option<String>,
    pub founded: Option<Date>,
    pub industry: Option<String>,
    pub stage: Option<String>,
    pub investors: Option<String>,
    // 억원
    #[sea_orm(column_type = "Double", nullable)]
    pub amount: Option<f64>,
    #[sea_orm(column_type = "Double", nullable)]
    pub total_funding: Option<f64>,
    pub location: Option<String>,
    pub employees: Option<i32>,
    pub news_title: Option<String>,
    pub news_url: Option<String>,
    pub news_date: Option<Date>,
    pub site_name: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
