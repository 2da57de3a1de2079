//! Deal and article persistence on sea-orm.

use chrono::{NaiveDate, Utc};
use sea_orm::sea_query::{Index, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction,
    EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema, Set, TransactionTrait,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::entities::{article, deal};
use crate::error::PipelineError;
use crate::models::{Article, ExtractedFacts, Stage};
use crate::normalize::{earliest_news_date, is_valid_news_date, normalize_company, within_currency_ceiling};
use crate::registry::{SourceRegistry, FALLBACK_SOURCE_ID, FALLBACK_SOURCE_NAME};
use crate::select::{score, ScoredArticle};

const DEAL_KEY_INDEX: &str = "idx_deals_company_news_date";

/// Opens the store. In-memory SQLite is pinned to one connection so every
/// query sees the same database.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, PipelineError> {
    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    if database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory") {
        options.max_connections(1).min_connections(1);
    }
    Database::connect(options)
        .await
        .map_err(|e| PipelineError::StoreUnreachable(e.to_string()))
}

/// Creates both tables and the composite deal key for local and test databases.
pub async fn bootstrap_schema(db: &DatabaseConnection) -> Result<(), PipelineError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut articles = schema.create_table_from_entity(article::Entity);
    articles.if_not_exists();
    db.execute(backend.build(&articles)).await?;
    let mut deals = schema.create_table_from_entity(deal::Entity);
    deals.if_not_exists();
    db.execute(backend.build(&deals)).await?;

    let key = Index::create()
        .name(DEAL_KEY_INDEX)
        .table(deal::Entity)
        .col(deal::Column::CompanyName)
        .col(deal::Column::NewsDate)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&key)).await?;
    info!("Schema bootstrap complete");
    Ok(())
}

/// Input to [`DealStore::upsert_deal`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealRecord {
    pub company_name: String,
    pub ceo: Option<String>,
    pub founded: Option<NaiveDate>,
    pub industry: Option<String>,
    pub stage: Option<Stage>,
    pub investors: Option<String>,
    pub amount: Option<f64>,
    pub total_funding: Option<f64>,
    pub location: Option<String>,
    pub employees: Option<i32>,
    pub news_title: Option<String>,
    pub news_url: Option<String>,
    pub news_date: Option<NaiveDate>,
    pub site_name: Option<String>,
}

impl DealRecord {
    pub fn from_parts(article: &Article, facts: &ExtractedFacts) -> Self {
        Self {
            company_name: facts.company_name.trim().to_string(),
            ceo: facts.ceo.clone(),
            founded: facts.founded,
            industry: facts.industry.clone(),
            stage: facts.stage,
            investors: facts.investors.clone(),
            amount: facts.amount,
            total_funding: facts.total_funding,
            location: facts.location.clone(),
            employees: facts.employees,
            news_title: Some(article.title.clone()),
            news_url: Some(article.url.clone()),
            news_date: article.published_date,
            site_name: Some(article.source_name.clone()),
        }
    }

    pub fn from_scored(scored: &ScoredArticle) -> Self {
        Self::from_parts(&scored.article, &scored.facts)
    }

    pub fn score(&self) -> u8 {
        score(&ExtractedFacts {
            amount: self.amount,
            investors: self.investors.clone(),
            stage: self.stage,
            industry: self.industry.clone(),
            location: self.location.clone(),
            employees: self.employees,
            ..ExtractedFacts::default()
        })
    }
}

/// Completeness score of a stored row, on the same scale as [`DealRecord::score`].
pub fn stored_score(model: &deal::Model) -> u8 {
    score(&ExtractedFacts {
        amount: model.amount,
        investors: model.investors.clone(),
        stage: model.stage.as_deref().and_then(Stage::from_label),
        industry: model.industry.clone(),
        location: model.location.clone(),
        employees: model.employees,
        ..ExtractedFacts::default()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted { id: i32, number: i32 },
    Overwritten { id: i32 },
    Merged { id: i32 },
}

impl UpsertOutcome {
    pub fn id(&self) -> i32 {
        match self {
            UpsertOutcome::Inserted { id, .. } | UpsertOutcome::Overwritten { id } | UpsertOutcome::Merged { id } => *id,
        }
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn fill_text(current: &Option<String>, incoming: &Option<String>) -> Option<Option<String>> {
    (blank(current) && !blank(incoming)).then(|| incoming.clone())
}

fn fill<T: Clone>(current: &Option<T>, incoming: &Option<T>) -> Option<Option<T>> {
    (current.is_none() && incoming.is_some()).then(|| incoming.clone())
}

pub struct DealStore {
    db: DatabaseConnection,
    registry: Arc<SourceRegistry>,
}

impl DealStore {
    pub fn new(db: DatabaseConnection, registry: Arc<SourceRegistry>) -> Self {
        Self { db, registry }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Applies the storage rules every deal must satisfy before it is written.
    fn sanitize(&self, mut record: DealRecord, today: NaiveDate) -> Result<DealRecord, PipelineError> {
        record.company_name = record.company_name.trim().to_string();
        if record.company_name.is_empty() {
            return Err(PipelineError::InvalidField("deal without company_name".to_string()));
        }
        if blank(&record.news_url) {
            return Err(PipelineError::InvalidField(format!(
                "deal for {} without news_url",
                record.company_name
            )));
        }
        if record.news_date.is_some_and(|d| d > today) {
            warn!("Dropping future news_date {:?} for {}", record.news_date, record.company_name);
            record.news_date = None;
        }
        let title = record.news_title.clone().unwrap_or_default();
        record.amount = record.amount.filter(|a| within_currency_ceiling(*a, &title));
        record.total_funding = record.total_funding.filter(|a| within_currency_ceiling(*a, &title));
        match record.site_name.as_deref() {
            Some(name) if self.registry.is_registered_name(name) => {}
            other => {
                debug!("Site name {:?} is not a registered source, using fallback", other);
                record.site_name = Some(FALLBACK_SOURCE_NAME.to_string());
            }
        }
        Ok(record)
    }

    /// Row matching the record's (company, date) key, else its news URL.
    async fn find_existing(
        txn: &DatabaseTransaction,
        record: &DealRecord,
    ) -> Result<Option<deal::Model>, PipelineError> {
        if let Some(date) = record.news_date {
            let by_key = deal::Entity::find()
                .filter(deal::Column::CompanyName.eq(record.company_name.as_str()))
                .filter(deal::Column::NewsDate.eq(date))
                .one(txn)
                .await?;
            if by_key.is_some() {
                return Ok(by_key);
            }
        }
        match record.news_url.as_deref() {
            Some(url) => Ok(deal::Entity::find()
                .filter(deal::Column::NewsUrl.eq(url))
                .order_by_asc(deal::Column::Number)
                .one(txn)
                .await?),
            None => Ok(None),
        }
    }

    async fn key_taken(
        txn: &DatabaseTransaction,
        company: &str,
        date: NaiveDate,
        except_id: i32,
    ) -> Result<bool, PipelineError> {
        let other = deal::Entity::find()
            .filter(deal::Column::CompanyName.eq(company))
            .filter(deal::Column::NewsDate.eq(date))
            .filter(deal::Column::Id.ne(except_id))
            .one(txn)
            .await?;
        Ok(other.is_some())
    }

    async fn next_number(txn: &DatabaseTransaction) -> Result<i32, PipelineError> {
        let max: Option<Option<i32>> = deal::Entity::find()
            .select_only()
            .column_as(deal::Column::Number.max(), "max_number")
            .into_tuple()
            .one(txn)
            .await?;
        Ok(max.flatten().unwrap_or(0) + 1)
    }

    /// Inserts the deal, or merges it into the row it duplicates.
    ///
    /// A strictly higher completeness score overwrites the stored facts;
    /// otherwise only empty stored fields are filled. `number` and the key
    /// columns of an existing row never change, except that a missing
    /// `news_date` is filled when that does not collide with another row.
    ///
    /// `today` is the run's date; news dates after it are rejected.
    #[tracing::instrument(skip(self, record), fields(company = %record.company_name))]
    pub async fn upsert_deal(&self, record: DealRecord, today: NaiveDate) -> Result<UpsertOutcome, PipelineError> {
        let record = self.sanitize(record, today)?;
        match self.upsert_once(&record).await {
            Err(PipelineError::DuplicateKey(_)) => {
                debug!("Key collision while writing {}, retrying as merge", record.company_name);
                self.upsert_once(&record).await
            }
            other => other,
        }
    }

    async fn upsert_once(&self, record: &DealRecord) -> Result<UpsertOutcome, PipelineError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let outcome = match Self::find_existing(&txn, record).await? {
            Some(existing) => {
                let id = existing.id;
                let overwrite = record.score() > stored_score(&existing);
                let fill_date = existing.news_date.is_none()
                    && match record.news_date {
                        Some(date) => !Self::key_taken(&txn, &existing.company_name, date, id).await?,
                        None => false,
                    };
                let mut active = existing.clone().into_active_model();
                let stage_label = record.stage.map(|s| s.label().to_string());
                if overwrite {
                    active.ceo = Set(record.ceo.clone().or(existing.ceo.clone()));
                    active.founded = Set(record.founded.or(existing.founded));
                    active.industry = Set(record.industry.clone().or(existing.industry.clone()));
                    active.stage = Set(stage_label.or(existing.stage.clone()));
                    active.investors = Set(record.investors.clone().or(existing.investors.clone()));
                    active.amount = Set(record.amount.or(existing.amount));
                    active.total_funding = Set(record.total_funding.or(existing.total_funding));
                    active.location = Set(record.location.clone().or(existing.location.clone()));
                    active.employees = Set(record.employees.or(existing.employees));
                    active.news_title = Set(record.news_title.clone().or(existing.news_title.clone()));
                    active.news_url = Set(record.news_url.clone().or(existing.news_url.clone()));
                    active.site_name = Set(record.site_name.clone().or(existing.site_name.clone()));
                } else {
                    if let Some(v) = fill_text(&existing.ceo, &record.ceo) {
                        active.ceo = Set(v);
                    }
                    if let Some(v) = fill(&existing.founded, &record.founded) {
                        active.founded = Set(v);
                    }
                    if let Some(v) = fill_text(&existing.industry, &record.industry) {
                        active.industry = Set(v);
                    }
                    if let Some(v) = fill_text(&existing.stage, &stage_label) {
                        active.stage = Set(v);
                    }
                    if let Some(v) = fill_text(&existing.investors, &record.investors) {
                        active.investors = Set(v);
                    }
                    if let Some(v) = fill(&existing.amount, &record.amount) {
                        active.amount = Set(v);
                    }
                    if let Some(v) = fill(&existing.total_funding, &record.total_funding) {
                        active.total_funding = Set(v);
                    }
                    if let Some(v) = fill_text(&existing.location, &record.location) {
                        active.location = Set(v);
                    }
                    if let Some(v) = fill(&existing.employees, &record.employees) {
                        active.employees = Set(v);
                    }
                    if let Some(v) = fill_text(&existing.news_title, &record.news_title) {
                        active.news_title = Set(v);
                    }
                    if let Some(v) = fill_text(&existing.news_url, &record.news_url) {
                        active.news_url = Set(v);
                    }
                    if let Some(v) = fill_text(&existing.site_name, &record.site_name) {
                        active.site_name = Set(v);
                    }
                }
                if fill_date {
                    active.news_date = Set(record.news_date);
                }
                active.updated_at = Set(now);
                active.update(&txn).await?;
                if overwrite {
                    UpsertOutcome::Overwritten { id }
                } else {
                    UpsertOutcome::Merged { id }
                }
            }
            None => {
                let number = Self::next_number(&txn).await?;
                let inserted = deal::ActiveModel {
                    number: Set(number),
                    company_name: Set(record.company_name.clone()),
                    ceo: Set(record.ceo.clone()),
                    founded: Set(record.founded),
                    industry: Set(record.industry.clone()),
                    stage: Set(record.stage.map(|s| s.label().to_string())),
                    investors: Set(record.investors.clone()),
                    amount: Set(record.amount),
                    total_funding: Set(record.total_funding),
                    location: Set(record.location.clone()),
                    employees: Set(record.employees),
                    news_title: Set(record.news_title.clone()),
                    news_url: Set(record.news_url.clone()),
                    news_date: Set(record.news_date),
                    site_name: Set(record.site_name.clone()),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                UpsertOutcome::Inserted {
                    id: inserted.id,
                    number: inserted.number,
                }
            }
        };

        txn.commit().await?;
        debug!("Deal write: {:?}", outcome);
        Ok(outcome)
    }

    /// Records a fetched article; returns false when the URL was already logged.
    #[tracing::instrument(skip(self, article), fields(url = %article.url))]
    pub async fn save_article(&self, article: &Article, today: NaiveDate) -> Result<bool, PipelineError> {
        let (site_number, site_name) = match self.registry.get(article.source_id) {
            Some(source) => (source.source_id, source.display_name.clone()),
            None => {
                if article.source_id != FALLBACK_SOURCE_ID {
                    warn!("Unknown source id {} coerced to {}", article.source_id, FALLBACK_SOURCE_ID);
                }
                (FALLBACK_SOURCE_ID, FALLBACK_SOURCE_NAME.to_string())
            }
        };
        let model = article::ActiveModel {
            site_number: Set(site_number),
            site_name: Set(site_name),
            site_url: Set(article.source_base_url.clone()),
            article_title: Set(article.title.clone()),
            article_url: Set(article.url.clone()),
            published_date: Set(article.published_date.filter(|d| *d <= today)),
            content_snippet: Set(article.snippet.clone()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        let inserted = article::Entity::insert(model)
            .on_conflict(OnConflict::column(article::Column::ArticleUrl).do_nothing().to_owned())
            .exec_without_returning(&self.db)
            .await?;
        Ok(inserted > 0)
    }

    pub async fn count_articles(&self) -> Result<u64, PipelineError> {
        Ok(article::Entity::find().count(&self.db).await?)
    }

    /// Deals dated within [mon, sun].
    pub async fn list_week(&self, mon: NaiveDate, sun: NaiveDate) -> Result<Vec<deal::Model>, PipelineError> {
        Ok(deal::Entity::find()
            .filter(deal::Column::NewsDate.between(mon, sun))
            .order_by_desc(deal::Column::NewsDate)
            .order_by_asc(deal::Column::Number)
            .all(&self.db)
            .await?)
    }

    pub async fn list_day(&self, day: NaiveDate) -> Result<Vec<deal::Model>, PipelineError> {
        Ok(deal::Entity::find()
            .filter(deal::Column::NewsDate.eq(day))
            .order_by_asc(deal::Column::Number)
            .all(&self.db)
            .await?)
    }

    /// Deals whose news_date is missing or outside [2020-01-01, today].
    pub async fn list_needing_dates(&self, today: NaiveDate) -> Result<Vec<deal::Model>, PipelineError> {
        let rows = deal::Entity::find()
            .filter(
                deal::Column::NewsDate
                    .is_null()
                    .or(deal::Column::NewsDate.gt(today))
                    .or(deal::Column::NewsDate.lt(earliest_news_date())),
            )
            .order_by_asc(deal::Column::Number)
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Sets a recovered date. Returns false when another row already owns
    /// (company, date) and the update was skipped.
    pub async fn update_news_date(&self, id: i32, date: NaiveDate, today: NaiveDate) -> Result<bool, PipelineError> {
        if !is_valid_news_date(date, today) {
            return Err(PipelineError::InvalidField(format!("news_date {} out of range", date)));
        }
        let txn = self.db.begin().await?;
        let Some(existing) = deal::Entity::find_by_id(id).one(&txn).await? else {
            return Err(PipelineError::InvalidField(format!("no deal with id {}", id)));
        };
        if Self::key_taken(&txn, &existing.company_name, date, id).await? {
            warn!("{} already has a deal on {}, leaving id {} undated", existing.company_name, date, id);
            txn.rollback().await?;
            return Ok(false);
        }
        let mut active = existing.into_active_model();
        active.news_date = Set(Some(date));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Deals for a company (by normalized name) dated within [from, to].
    pub async fn find_company_between(
        &self,
        company: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<deal::Model>, PipelineError> {
        let wanted = normalize_company(company);
        let rows = deal::Entity::find()
            .filter(deal::Column::NewsDate.between(from, to))
            .order_by_asc(deal::Column::Number)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|d| normalize_company(&d.company_name) == wanted)
            .collect())
    }
}
