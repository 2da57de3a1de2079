//! Process-wide source registry and company alias map.
//!
//! Both are loaded once at startup, either from the built-in tables below or
//! from JSON files named in the configuration, and are read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::normalize::{bare_host, nfc, normalize_company};

/// `site_number` for records whose article came from an unregistered host.
pub const FALLBACK_SOURCE_ID: i32 = 99;
pub const FALLBACK_SOURCE_NAME: &str = "(fallback search)";
pub const FALLBACK_RANK: u32 = 99;

/// Ordered selector cascades. The first selector that yields a result wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub article: Vec<String>,
    pub title: Vec<String>,
    pub link: Vec<String>,
    pub date: Vec<String>,
    pub body: Vec<String>,
    #[serde(default)]
    pub article_title: Vec<String>,
    #[serde(default)]
    pub article_date: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: i32,
    pub display_name: String,
    pub base_url: String,
    pub rank: u32,
    /// Listing page URL with a `{page}` placeholder.
    pub listing_url_template: String,
    /// Site search URL with a `{query}` placeholder, when the site has one.
    #[serde(default)]
    pub search_url_template: Option<String>,
    pub selectors: SelectorConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sources known to throttle get the longer inter-request delay.
    #[serde(default)]
    pub throttled: bool,
    /// Korean CMS family pages default to EUC-KR when nothing is declared.
    #[serde(default)]
    pub legacy_encoding: bool,
}

fn default_enabled() -> bool {
    true
}

impl Source {
    pub fn listing_url(&self, page: u32) -> String {
        self.listing_url_template.replace("{page}", &page.to_string())
    }

    pub fn search_url(&self, query: &str) -> Option<String> {
        self.search_url_template
            .as_ref()
            .map(|template| template.replace("{query}", &urlencode(query)))
    }

    pub fn host(&self) -> Option<String> {
        bare_host(&self.base_url)
    }
}

fn urlencode(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new(mut sources: Vec<Source>) -> Result<Self, PipelineError> {
        let mut ids = HashSet::new();
        for source in &sources {
            if source.source_id == FALLBACK_SOURCE_ID {
                return Err(PipelineError::MissingConfig(format!(
                    "source id {} is reserved for fallback search",
                    FALLBACK_SOURCE_ID
                )));
            }
            if !ids.insert(source.source_id) {
                return Err(PipelineError::MissingConfig(format!("duplicate source id {}", source.source_id)));
            }
        }
        sources.sort_by_key(|s| (s.rank, s.source_id));
        Ok(Self { sources })
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let file = std::fs::File::open(path)?;
        let sources: Vec<Source> = serde_json::from_reader(file)?;
        info!("Loaded {} sources from {}", sources.len(), path.display());
        Self::new(sources)
    }

    /// All sources in rank order, 1 first.
    pub fn all(&self) -> &[Source] {
        &self.sources
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// The `n` most authoritative enabled sources that offer a site search.
    pub fn top_searchable(&self, n: usize) -> Vec<&Source> {
        self.enabled().filter(|s| s.search_url_template.is_some()).take(n).collect()
    }

    pub fn get(&self, source_id: i32) -> Option<&Source> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn rank_of(&self, source_id: i32) -> u32 {
        self.get(source_id).map(|s| s.rank).unwrap_or(FALLBACK_RANK)
    }

    pub fn name_of(&self, source_id: i32) -> &str {
        self.get(source_id).map(|s| s.display_name.as_str()).unwrap_or(FALLBACK_SOURCE_NAME)
    }

    /// Registered source whose host matches the URL's host.
    pub fn source_for_url(&self, url: &str) -> Option<&Source> {
        let host = bare_host(url)?;
        self.sources.iter().find(|s| {
            s.host()
                .map(|h| host == h || host.ends_with(&format!(".{h}")))
                .unwrap_or(false)
        })
    }

    /// Registered source whose display name matches an `og:site_name` value.
    pub fn source_for_site_name(&self, site_name: &str) -> Option<&Source> {
        let wanted = nfc(site_name.trim()).to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.sources
            .iter()
            .find(|s| nfc(&s.display_name).to_lowercase() == wanted)
    }

    pub fn is_registered_name(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.display_name == name)
    }

    /// Hosts of every registered source, used to filter web search results.
    pub fn domains(&self) -> Vec<String> {
        self.sources.iter().filter_map(Source::host).collect()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(default_sources()).expect("built-in registry is consistent")
    }
}

fn wordpress_selectors() -> SelectorConfig {
    SelectorConfig {
        article: vec!["article".into(), "div.post".into(), "li.post".into()],
        title: vec![".entry-title a".into(), "h2 a".into(), "h3 a".into()],
        link: vec![".entry-title a".into(), "h2 a".into(), "h3 a".into(), "a".into()],
        date: vec!["time".into(), ".entry-date".into(), ".date".into()],
        body: vec![".entry-content".into(), "div.post-content".into(), "article".into()],
        article_title: vec!["h1.entry-title".into(), "h1".into()],
        article_date: vec!["time.entry-date".into(), ".entry-date".into(), "time".into()],
    }
}

fn cms_selectors() -> SelectorConfig {
    SelectorConfig {
        article: vec!["#section-list li".into(), "ul.type2 li".into(), ".article-list .list-block".into()],
        title: vec!["h4.titles a".into(), ".list-titles a".into(), "a strong".into()],
        link: vec!["h4.titles a".into(), ".list-titles a".into(), "a".into()],
        date: vec!["em.info.dated".into(), ".byline em".into(), ".list-dated".into()],
        body: vec!["#article-view-content-div".into(), "article#article-view-content-div".into(), ".article-body".into()],
        article_title: vec!["h3.heading".into(), ".article-head-title".into(), "h1".into()],
        article_date: vec!["ul.infomation li:nth-child(2)".into(), ".info-text li".into()],
    }
}

fn source(
    source_id: i32,
    display_name: &str,
    base_url: &str,
    rank: u32,
    listing: &str,
    search: Option<&str>,
    selectors: SelectorConfig,
) -> Source {
    Source {
        source_id,
        display_name: display_name.to_string(),
        base_url: base_url.to_string(),
        rank,
        listing_url_template: listing.to_string(),
        search_url_template: search.map(str::to_string),
        selectors,
        enabled: true,
        throttled: false,
        legacy_encoding: false,
    }
}

pub fn default_sources() -> Vec<Source> {
    let mut thebell = source(
        16,
        "더벨",
        "https://www.thebell.co.kr",
        7,
        "https://www.thebell.co.kr/free/content/Article.asp?page={page}",
        Some("https://www.thebell.co.kr/free/content/Search.asp?keyword={query}"),
        SelectorConfig {
            article: vec![".listBox ul li".into(), "ul.list li".into()],
            title: vec!["dt a".into(), "a".into()],
            link: vec!["dt a".into(), "a".into()],
            date: vec![".date".into(), "span.date".into()],
            body: vec!["#article_main".into(), ".viewSection".into()],
            article_title: vec![".viewHead .tit".into(), "h1".into()],
            article_date: vec![".userBox .date".into(), ".date".into()],
        },
    );
    thebell.throttled = true;
    thebell.legacy_encoding = true;

    let cms = |id: i32, name: &str, base: &str, rank: u32| {
        let mut s = source(
            id,
            name,
            base,
            rank,
            &format!("{base}/news/articleList.html?page={{page}}&view_type=sm"),
            Some(&format!("{base}/news/articleList.html?sc_area=A&view_type=sm&sc_word={{query}}")),
            cms_selectors(),
        );
        s.legacy_encoding = true;
        s
    };

    vec![
        source(
            1,
            "WOWTALE",
            "https://wowtale.net",
            1,
            "https://wowtale.net/page/{page}/",
            Some("https://wowtale.net/?s={query}"),
            wordpress_selectors(),
        ),
        source(
            9,
            "벤처스퀘어",
            "https://www.venturesquare.net",
            2,
            "https://www.venturesquare.net/category/news-trends/news/page/{page}",
            Some("https://www.venturesquare.net/?s={query}"),
            wordpress_selectors(),
        ),
        source(
            10,
            "플래텀",
            "https://platum.kr",
            3,
            "https://platum.kr/archives/category/investment/page/{page}",
            Some("https://platum.kr/?s={query}"),
            wordpress_selectors(),
        ),
        cms(11, "스타트업투데이", "https://www.startuptoday.kr", 4),
        source(
            13,
            "아웃스탠딩",
            "https://outstanding.kr",
            5,
            "https://outstanding.kr/category/news?page={page}",
            Some("https://outstanding.kr/search?keyword={query}"),
            SelectorConfig {
                article: vec![".article_list li".into(), "article".into()],
                title: vec![".title".into(), "h3".into()],
                link: vec!["a".into()],
                date: vec![".date".into(), "time".into()],
                body: vec![".article_body".into(), ".content_body".into(), "article".into()],
                article_title: vec!["h1".into()],
                article_date: vec![".date".into(), "time".into()],
            },
        ),
        source(
            14,
            "비석세스",
            "https://besuccess.com",
            6,
            "https://besuccess.com/page/{page}/",
            Some("https://besuccess.com/?s={query}"),
            wordpress_selectors(),
        ),
        thebell,
        cms(19, "AI타임스", "https://www.aitimes.com", 8),
        source(
            21,
            "넥스트유니콘",
            "https://www.nextunicorn.kr",
            9,
            "https://www.nextunicorn.kr/content?page={page}",
            None,
            SelectorConfig {
                article: vec![".content-list .item".into(), "article".into()],
                title: vec![".title".into(), "h3".into()],
                link: vec!["a".into()],
                date: vec![".date".into()],
                body: vec![".content-body".into(), "article".into()],
                article_title: vec!["h1".into()],
                article_date: vec![".date".into()],
            },
        ),
        cms(22, "블로터", "https://www.bloter.net", 10),
        cms(23, "이코노미스트", "https://www.economist.co.kr", 11),
    ]
}

const BUILTIN_ALIASES: &[(&str, &[&str])] = &[
    ("비바리퍼블리카", &["토스", "Viva Republica"]),
    ("토스", &["비바리퍼블리카"]),
    ("당근", &["당근마켓", "Daangn"]),
    ("뤼튼", &["뤼튼테크놀로지스", "Wrtn"]),
    ("업스테이지", &["Upstage"]),
    ("리벨리온", &["Rebellions"]),
    ("퓨리오사AI", &["퓨리오사에이아이", "FuriosaAI"]),
    ("컬리", &["마켓컬리", "Kurly"]),
    ("두나무", &["업비트", "Dunamu"]),
    ("버킷플레이스", &["오늘의집"]),
    ("오늘의집", &["버킷플레이스"]),
    ("야놀자", &["Yanolja"]),
    ("무신사", &["Musinsa"]),
    ("직방", &["Zigbang"]),
];

/// Curated alternative names (English ↔ Korean, legacy names, frequent misreadings).
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    by_key: HashMap<String, Vec<String>>,
}

impl AliasMap {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        let by_key = entries
            .into_iter()
            .map(|(company, aliases)| (normalize_company(&company), aliases))
            .collect();
        Self { by_key }
    }

    /// The bundled table; `ALIASES_PATH` replaces it wholesale.
    pub fn builtin() -> Self {
        let entries = BUILTIN_ALIASES
            .iter()
            .map(|(company, aliases)| {
                (company.to_string(), aliases.iter().map(|a| a.to_string()).collect())
            })
            .collect();
        Self::new(entries)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let file = std::fs::File::open(path)?;
        let entries: HashMap<String, Vec<String>> = serde_json::from_reader(file)?;
        debug!("Loaded aliases for {} companies from {}", entries.len(), path.display());
        Ok(Self::new(entries))
    }

    pub fn aliases_for(&self, company: &str) -> &[String] {
        self.by_key
            .get(&normalize_company(company))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
