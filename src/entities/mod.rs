pub mod article;
pub mod deal;

pub use article::Entity as NewsArticle;
pub use deal::Entity as Deal;
