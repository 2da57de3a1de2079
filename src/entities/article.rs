use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Log of every article the crawler has seen, one row per URL.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "investment_news_articles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i32,
    pub site_number: i32,
    pub site_name: String,
    pub site_url: String,
    pub article_title: String,
    #[sea_orm(unique)]
    pub article_url: String,
    pub published_date: Option<Date>,
    #[sea_orm(column_type = "Text", nullable)]
    pub content_snippet: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
