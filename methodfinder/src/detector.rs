//! Detector: fetch each URL and classify how the translation script is installed.

use anyhow::{bail, Context, Result};
use futures::{stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::columns;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::export;
use crate::fetch::PageFetcher;
use crate::logger::PipelineLogger;
use crate::records::{DetectionResult, IntegrationMethod};
use crate::rules::{self, RuleSet, ScriptAttributes, INFO_ATTR, PRIMARY_ATTR};
use crate::table::Table;

static SCRIPT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("script[src]").unwrap());
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

/// What a page says about its integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub method: IntegrationMethod,
    pub version: Option<String>,
    /// Token from the tag's `key=` marker
    pub token: Option<String>,
    pub title: Option<String>,
}

/// Find the first `<script>` whose `src` matches `script_src` and classify it.
pub fn inspect_html(html: &str, script_src: &Regex, rules: &RuleSet) -> Inspection {
    let document = Html::parse_document(html);
    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let tag = document.select(&SCRIPT_SELECTOR).find(|element| {
        element
            .value()
            .attr("src")
            .map(|src| script_src.is_match(src))
            .unwrap_or(false)
    });

    let Some(tag) = tag else {
        return Inspection {
            method: IntegrationMethod::NotInstalled,
            version: None,
            token: None,
            title,
        };
    };

    let attrs = ScriptAttributes::new(
        tag.value().attr(PRIMARY_ATTR).unwrap_or(""),
        tag.value().attr(INFO_ATTR).unwrap_or(""),
    );
    let classification = rules.classify(&attrs);
    debug!("Script tag matched rule {:?}", classification.rule);

    Inspection {
        method: classification.method,
        version: classification.version,
        token: rules::extract_token(&attrs),
        title,
    }
}

/// One URL to inspect. `token` is `None` in url-only mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectTarget {
    pub token: Option<String>,
    pub url: String,
}

/// Read detector input. Rows with a blank url are dropped, and so are rows
/// with a blank token unless `url_only` is set, in which case the token
/// column is not read at all.
pub fn load_targets(path: &Path, url_only: bool) -> Result<Vec<DetectTarget>> {
    let table = Table::from_path(path)?;
    targets_from_table(&table, url_only)
}

pub fn targets_from_table(table: &Table, url_only: bool) -> Result<Vec<DetectTarget>> {
    let url_col = table.require(&columns::TARGET_URL)?;
    let token_col = if url_only {
        None
    } else {
        Some(table.require(&columns::TARGET_TOKEN)?)
    };

    let mut targets = Vec::with_capacity(table.len());
    let mut dropped = 0;
    for row in 0..table.len() {
        let url = table.value(row, url_col).map(str::trim).filter(|u| !u.is_empty());
        let token = token_col
            .and_then(|col| table.value(row, col))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        match (url, token_col.is_some(), token) {
            (Some(url), false, _) => targets.push(DetectTarget { token: None, url: url.to_string() }),
            (Some(url), true, Some(token)) => targets.push(DetectTarget {
                token: Some(token.to_string()),
                url: url.to_string(),
            }),
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("{}: dropped {} rows with a blank token or url", table.source(), dropped);
    }
    Ok(targets)
}

/// Classifies pages. Cheap to share behind an `Arc` across tasks.
#[derive(Debug, Clone)]
pub struct Detector {
    fetcher: PageFetcher,
    rules: RuleSet,
    script_src: Regex,
    skip_domains: Vec<String>,
}

impl Detector {
    pub fn new(fetcher: PageFetcher, rules: RuleSet, script_src_pattern: &str, skip_domains: Vec<String>) -> Result<Self> {
        let script_src = Regex::new(script_src_pattern)
            .with_context(|| format!("Invalid script src pattern: {}", script_src_pattern))?;
        Ok(Self {
            fetcher,
            rules,
            script_src,
            skip_domains,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            PageFetcher::from_config(config)?,
            RuleSet::standard(),
            &config.detector.script_src_pattern,
            config.detector.skip_domains.clone(),
        )
    }

    /// URLs on an authentication wall are never fetched.
    pub fn should_skip(&self, url: &str) -> bool {
        self.skip_domains.iter().any(|d| !d.is_empty() && url.contains(d.as_str()))
    }

    pub async fn detect(&self, target: &DetectTarget) -> DetectionResult {
        if self.should_skip(&target.url) {
            debug!("Skipping {}", target.url);
            return DetectionResult::new(target.token.clone(), &target.url, IntegrationMethod::Skipped);
        }

        let body = match self.fetcher.fetch(&target.url).await {
            Ok(body) => body,
            Err(e) => {
                debug!("Giving up on {}: {}", target.url, e);
                // Url-only rows keep the fetch error
                let method = match target.token {
                    Some(_) => IntegrationMethod::RequestFailed,
                    None => IntegrationMethod::Error(e.to_string()),
                };
                return DetectionResult::new(target.token.clone(), &target.url, method);
            }
        };

        let inspection = inspect_html(&body, &self.script_src, &self.rules);
        let (token, title) = match &target.token {
            Some(token) => (Some(token.clone()), None),
            None => (inspection.token, inspection.title),
        };
        DetectionResult::new(token, &target.url, inspection.method)
            .with_version(inspection.version)
            .with_title(title)
    }

    /// Inspect every target with at most `concurrency` requests in flight.
    /// Results arrive in completion order; a task that dies produces an
    /// `Error` row instead of aborting the batch.
    pub async fn detect_batch(
        self: Arc<Self>,
        targets: Vec<DetectTarget>,
        concurrency: usize,
        logger: &PipelineLogger,
    ) -> Vec<DetectionResult> {
        let total = targets.len();
        let concurrency = concurrency.max(1);

        let mut results_stream = stream::iter(targets.into_iter().map(|target| {
            let detector = Arc::clone(&self);
            async move {
                let token = target.token.clone();
                let url = target.url.clone();
                let handle = tokio::spawn(async move { detector.detect(&target).await });
                match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        let message = join_error_message(e);
                        warn!("Detection task for {} failed: {}", url, message);
                        DetectionResult::new(token, url, IntegrationMethod::Error(message))
                    }
                }
            }
        }))
        .buffer_unordered(concurrency);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = results_stream.next().await {
            logger.record_method(&result.method.as_label());
            if result.method.is_failure() {
                logger.warn(&format!("{}: {}", result.url, result.method));
                logger.record_failure(&result.url, &result.method.as_label());
            }
            logger.advance_progress(1).await;
            results.push(result);
        }
        results
    }
}

fn join_error_message(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
    pub url_only: bool,
    pub concurrency: usize,
    /// Also write every result into this one file
    pub combined: Option<PathBuf>,
    /// Write `<stem>_errors.csv` next to each output
    pub write_errors: bool,
}

/// Every `*.csv` in a directory (sorted by name), or the file itself.
pub fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.is_dir() {
        if !input.exists() {
            bail!("Input not found: {}", input.display());
        }
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(input)
        .with_context(|| format!("Failed to read directory {}", input.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(PipelineError::NoInputFiles(input.to_path_buf()).into());
    }
    Ok(files)
}

pub fn errors_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    output_dir.join(format!("{}_errors.csv", stem))
}

/// Run the detector over a file or directory, mirroring each input file
/// into `output_dir` under the same name.
pub async fn run_detect(
    detector: Arc<Detector>,
    input: &Path,
    output_dir: &Path,
    options: &DetectOptions,
    logger: &PipelineLogger,
) -> Result<Vec<DetectionResult>> {
    let files = input_files(input)?;

    // Load everything first so a bad header aborts before any request is made
    let mut batches = Vec::with_capacity(files.len());
    for file in &files {
        let targets = load_targets(file, options.url_only)?;
        logger.record_input(&file.display().to_string(), targets.len());
        batches.push((file.clone(), targets));
    }

    let total: usize = batches.iter().map(|(_, t)| t.len()).sum();
    info!("Detecting {} URLs from {} files (concurrency {})", total, files.len(), options.concurrency);
    logger.start_progress(total as u64).await;

    let mut all_results = Vec::new();
    for (file, targets) in batches {
        let file_name = file.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("detections.csv"));
        let output = output_dir.join(&file_name);
        if output == file {
            logger.finish_progress().await;
            bail!("Output {} would overwrite its input; choose another output directory", output.display());
        }

        logger.update_progress(&file_name.display().to_string()).await;
        let results = Arc::clone(&detector)
            .detect_batch(targets, options.concurrency, logger)
            .await;

        export::export_detections(&results, &output, options.url_only)?;
        logger.record_output(&output.display().to_string(), results.len());

        if options.write_errors {
            let failures: Vec<DetectionResult> = results.iter().filter(|r| r.method.is_failure()).cloned().collect();
            let path = errors_path(output_dir, &file);
            export::export_detections(&failures, &path, options.url_only)?;
            logger.record_side_output(&path.display().to_string(), failures.len());
        }

        all_results.extend(results);
    }
    logger.finish_progress().await;

    if let Some(combined) = &options.combined {
        export::export_detections(&all_results, combined, options.url_only)?;
        logger.record_side_output(&combined.display().to_string(), all_results.len());
    }

    Ok(all_results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wovn_src() -> Regex {
        Regex::new(r"j\.wovn\.io").unwrap()
    }

    fn inspect(html: &str) -> Inspection {
        inspect_html(html, &wovn_src(), &RuleSet::standard())
    }

    #[test]
    fn test_page_without_tag_is_not_installed() {
        let inspection = inspect("<html><head><script src=\"/app.js\"></script></head></html>");
        assert_eq!(inspection.method, IntegrationMethod::NotInstalled);
        assert_eq!(inspection.token, None);
    }

    #[test]
    fn test_proxy_tag() {
        let html = r#"<html><head>
            <script src="https://j.wovn.io/1" data-wovnio="key=Tok-1&backend=true&backendVersion=WOVN.proxy_0.3.12" async></script>
        </head></html>"#;
        let inspection = inspect(html);
        assert_eq!(inspection.method, IntegrationMethod::Proxy);
        assert_eq!(inspection.version.as_deref(), Some("0.3.12"));
        assert_eq!(inspection.token.as_deref(), Some("Tok-1"));
    }

    #[test]
    fn test_wordpress_uses_info_attribute() {
        let html = r#"<script src="//j.wovn.io/1" data-wovnio="key=abc&backend=false" data-wovnio-info="version=WOVN.wp_3.1.0"></script>"#;
        let inspection = inspect(html);
        assert_eq!(inspection.method, IntegrationMethod::WordPressPlugin);
        assert_eq!(inspection.version.as_deref(), Some("3.1.0"));
    }

    #[test]
    fn test_first_matching_script_wins() {
        let html = r#"
            <script src="https://cdn.other.com/x.js" data-wovnio="key=zzz&backendVersion=WOVN.proxy_9"></script>
            <script src="https://j.wovn.io/1" data-wovnio="key=first"></script>
            <script src="https://j.wovn.io/1" data-wovnio="key=second&backend=true&backendVersion=WOVN.php_1.0"></script>
        "#;
        let inspection = inspect(html);
        assert_eq!(inspection.method, IntegrationMethod::ScriptTag);
        assert_eq!(inspection.token.as_deref(), Some("first"));
    }

    #[test]
    fn test_title_captured() {
        let inspection = inspect("<html><head><title>\n  Example Home </title></head></html>");
        assert_eq!(inspection.title.as_deref(), Some("Example Home"));
        assert_eq!(inspect("<html><head></head></html>").title, None);
    }

    #[test]
    fn test_tag_without_attributes_is_not_installed() {
        let inspection = inspect(r#"<script src="https://j.wovn.io/1"></script>"#);
        assert_eq!(inspection.method, IntegrationMethod::NotInstalled);
    }

    #[test]
    fn test_load_targets_drops_blank_rows() {
        let table = Table::from_reader(
            "in.csv",
            "Token,URL\nabc,https://a.com\n,https://b.com\nxyz,\n  ,  \n".as_bytes(),
        )
        .unwrap();
        let targets = targets_from_table(&table, false).unwrap();
        assert_eq!(
            targets,
            vec![DetectTarget { token: Some("abc".into()), url: "https://a.com".into() }]
        );
    }

    #[test]
    fn test_url_only_ignores_token_column() {
        let table = Table::from_reader("in.csv", "url\nhttps://a.com\n\nhttps://b.com\n".as_bytes()).unwrap();
        let targets = targets_from_table(&table, true).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| t.token.is_none()));
    }

    #[test]
    fn test_missing_token_column_is_fatal() {
        let table = Table::from_reader("in.csv", "url\nhttps://a.com\n".as_bytes()).unwrap();
        assert!(targets_from_table(&table, false).is_err());
    }

    #[test]
    fn test_errors_path() {
        let path = errors_path(Path::new("/out"), Path::new("/in/file_3.csv"));
        assert_eq!(path, PathBuf::from("/out/file_3_errors.csv"));
    }

    #[test]
    fn test_input_files_sorted_csv_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["file_2.csv", "file_1.CSV", "notes.txt"] {
            std::fs::write(dir.path().join(name), "token,url\n").unwrap();
        }
        let files = input_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["file_1.CSV", "file_2.csv"]);
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = input_files(dir.path()).unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }

    #[tokio::test]
    async fn test_panicked_task_message() {
        let err = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        assert_eq!(join_error_message(err), "boom");
    }
}
