//! CSS-selector driven extraction
//!
//! A job's `[[job.record]]` rules are compiled once into a
//! [`SelectorExtractor`]. Each rule yields records for one destination:
//! - with `rows`, one record per matching element, fields selected inside it
//! - without `rows`, one record per page, fields selected from the document
//!
//! Every record also carries `_url` metadata, which the sink never writes.

use crate::config::{FieldRule, JobConfig, RecordRule};
use crate::extract::{ExtractError, Extraction, Extractor};
use crate::state::{FetchTask, Fields, Record};
use scraper::{ElementRef, Html, Selector};

/// Metadata key holding the URL a record was extracted from
pub const URL_KEY: &str = "_url";

#[derive(Debug)]
enum FieldSource {
    Select {
        selector: Selector,
        attr: Option<String>,
    },
    Context(String),
}

#[derive(Debug)]
struct CompiledField {
    name: String,
    source: FieldSource,
    digits: bool,
    strip_commas: bool,
}

#[derive(Debug)]
struct CompiledRule {
    destination: String,
    rows: Option<Selector>,
    fields: Vec<CompiledField>,
}

/// Extractor compiled from a job's record rules
#[derive(Debug)]
pub struct SelectorExtractor {
    rules: Vec<CompiledRule>,
    next: Option<Selector>,
}

fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

impl SelectorExtractor {
    /// Compiles the record rules and next-page selector of a job
    ///
    /// # Returns
    ///
    /// * `Ok(SelectorExtractor)` - All selectors parsed
    /// * `Err(ExtractError::Selector)` - A selector is invalid
    pub fn from_job(job: &JobConfig) -> Result<Self, ExtractError> {
        let rules = job
            .records
            .iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>, _>>()?;
        let next = job.next.as_deref().map(compile).transpose()?;
        Ok(Self { rules, next })
    }

    fn build_record(rule: &CompiledRule, scope: ElementRef<'_>, task: &FetchTask) -> Option<Record> {
        let mut fields = Fields::new();
        let mut page_values = 0;

        for field in &rule.fields {
            let raw = match &field.source {
                FieldSource::Select { selector, attr } => {
                    let value = select_value(scope, selector, attr.as_deref());
                    if !value.is_empty() {
                        page_values += 1;
                    }
                    value
                }
                FieldSource::Context(key) => task.context.get(key).unwrap_or("").to_string(),
            };
            fields.insert(field.name.as_str(), field.transform(raw));
        }

        // A row where no selector matched anything is layout, not data
        let has_selectors = rule
            .fields
            .iter()
            .any(|f| matches!(f.source, FieldSource::Select { .. }));
        if rule.rows.is_some() && has_selectors && page_values == 0 {
            return None;
        }

        fields.insert(URL_KEY, task.url.as_str());
        Some(Record::new(rule.destination.as_str(), fields))
    }
}

fn compile_rule(rule: &RecordRule) -> Result<CompiledRule, ExtractError> {
    let fields = rule
        .fields
        .iter()
        .map(compile_field)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompiledRule {
        destination: rule.destination.clone(),
        rows: rule.rows.as_deref().map(compile).transpose()?,
        fields,
    })
}

fn compile_field(field: &FieldRule) -> Result<CompiledField, ExtractError> {
    let source = match (&field.select, &field.context) {
        (Some(selector), _) => FieldSource::Select {
            selector: compile(selector)?,
            attr: field.attr.clone(),
        },
        (None, Some(key)) => FieldSource::Context(key.clone()),
        (None, None) => {
            return Err(ExtractError::Content(format!(
                "field '{}' has neither a selector nor a context key",
                field.name
            )))
        }
    };
    Ok(CompiledField {
        name: field.name.clone(),
        source,
        digits: field.digits,
        strip_commas: field.strip_commas,
    })
}

impl CompiledField {
    fn transform(&self, value: String) -> String {
        let value = if self.digits {
            first_digit_run(&value).to_string()
        } else {
            value
        };
        if self.strip_commas {
            value.replace(',', "")
        } else {
            value
        }
    }
}

/// Text (whitespace collapsed) or attribute of the first match inside `scope`
fn select_value(scope: ElementRef<'_>, selector: &Selector, attr: Option<&str>) -> String {
    let Some(element) = scope.select(selector).next() else {
        return String::new();
    };
    match attr {
        Some(name) => element.value().attr(name).unwrap_or("").trim().to_string(),
        None => collapse_whitespace(element.text()),
    }
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First run of ASCII digits, e.g. the id inside "/horse/2019104975/"
fn first_digit_run(value: &str) -> &str {
    let Some(start) = value.find(|c: char| c.is_ascii_digit()) else {
        return "";
    };
    let rest = &value[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    &rest[..end]
}

impl Extractor for SelectorExtractor {
    fn extract(&self, content: &str, task: &FetchTask) -> Result<Extraction, ExtractError> {
        if content.trim().is_empty() {
            return Err(ExtractError::EmptyDocument);
        }

        let document = Html::parse_document(content);
        let root = document.root_element();
        let mut records = Vec::new();

        for rule in &self.rules {
            match &rule.rows {
                Some(rows) => {
                    for row in root.select(rows) {
                        records.extend(Self::build_record(rule, row, task));
                    }
                }
                None => records.extend(Self::build_record(rule, root, task)),
            }
        }

        let next_link = self.next.as_ref().and_then(|selector| {
            root.select(selector)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::trim)
                .filter(|href| !href.is_empty())
                .map(str::to_string)
        });

        tracing::trace!(
            "Extracted {} records from {} (next: {:?})",
            records.len(),
            task.url,
            next_link
        );

        Ok(Extraction { records, next_link })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{TaskId, TaskKind};
    use url::Url;

    const RACE_PAGE: &str = r#"
        <html><body>
          <h1>Tokyo Yushun</h1>
          <div class="data_intro"><p class="smalltxt">2024年5月26日 2回東京12日目</p></div>
          <table class="race_table_01">
            <tr><th>着順</th><th>馬名</th><th>賞金</th></tr>
            <tr>
              <td>1</td>
              <td><a href="/horse/2021105898/">Dante  Road</a></td>
              <td>20,000.0</td>
            </tr>
            <tr>
              <td>2</td>
              <td><a href="/horse/2021104455/">Justin Milano</a></td>
              <td>8,000.0</td>
            </tr>
          </table>
          <a href="/?pid=race_list&amp;page=2" title="次">次</a>
        </body></html>
    "#;

    fn task() -> FetchTask {
        FetchTask {
            id: TaskId(1),
            job: "race_result".to_string(),
            url: Url::parse("https://db.example.com/race/202405021011/").unwrap(),
            kind: TaskKind::Enumerated,
            context: [("job", "race_result"), ("id", "202405021011")]
                .into_iter()
                .collect(),
            retry_count: 0,
            page: 0,
        }
    }

    fn field(name: &str, select: &str) -> FieldRule {
        FieldRule {
            name: name.to_string(),
            select: Some(select.to_string()),
            ..FieldRule::default()
        }
    }

    fn job() -> JobConfig {
        JobConfig {
            name: "race_result".to_string(),
            next: Some(r#"a[title="次"]"#.to_string()),
            records: vec![
                RecordRule {
                    destination: "race_result.csv".to_string(),
                    rows: Some("table.race_table_01 tr".to_string()),
                    fields: vec![
                        FieldRule {
                            name: "race_id".to_string(),
                            context: Some("id".to_string()),
                            ..FieldRule::default()
                        },
                        field("rank", "td:nth-child(1)"),
                        field("horse_name", "td:nth-child(2) a"),
                        FieldRule {
                            attr: Some("href".to_string()),
                            digits: true,
                            ..field("horse_id", "td:nth-child(2) a")
                        },
                        FieldRule {
                            strip_commas: true,
                            ..field("prize", "td:nth-child(3)")
                        },
                    ],
                },
                RecordRule {
                    destination: "race_info.csv".to_string(),
                    rows: None,
                    fields: vec![field("race_name", "h1"), field("date", "p.smalltxt")],
                },
            ],
            ..JobConfig::default()
        }
    }

    #[test]
    fn test_rows_become_records() {
        let extractor = SelectorExtractor::from_job(&job()).unwrap();
        let extraction = extractor.extract(RACE_PAGE, &task()).unwrap();

        let results: Vec<_> = extraction
            .records
            .iter()
            .filter(|r| r.destination == "race_result.csv")
            .collect();
        // The header row has no <td> and is dropped
        assert_eq!(results.len(), 2);

        let first = &results[0].fields;
        assert_eq!(first.get("race_id"), Some("202405021011"));
        assert_eq!(first.get("rank"), Some("1"));
        assert_eq!(first.get("horse_name"), Some("Dante Road"));
        assert_eq!(first.get("horse_id"), Some("2021105898"));
        assert_eq!(first.get("prize"), Some("20000.0"));
        assert_eq!(
            first.column_names(),
            vec!["race_id", "rank", "horse_name", "horse_id", "prize"]
        );
        assert_eq!(
            first.get(URL_KEY),
            Some("https://db.example.com/race/202405021011/")
        );
    }

    #[test]
    fn test_page_level_record() {
        let extractor = SelectorExtractor::from_job(&job()).unwrap();
        let extraction = extractor.extract(RACE_PAGE, &task()).unwrap();

        let info: Vec<_> = extraction
            .records
            .iter()
            .filter(|r| r.destination == "race_info.csv")
            .collect();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].fields.get("race_name"), Some("Tokyo Yushun"));
        assert_eq!(
            info[0].fields.get("date"),
            Some("2024年5月26日 2回東京12日目")
        );
    }

    #[test]
    fn test_next_link() {
        let extractor = SelectorExtractor::from_job(&job()).unwrap();
        let extraction = extractor.extract(RACE_PAGE, &task()).unwrap();
        assert_eq!(
            extraction.next_link.as_deref(),
            Some("/?pid=race_list&page=2")
        );

        let last_page = "<html><body><p>no more</p></body></html>";
        let extraction = extractor.extract(last_page, &task()).unwrap();
        assert_eq!(extraction.next_link, None);
    }

    #[test]
    fn test_empty_document_fails() {
        let extractor = SelectorExtractor::from_job(&job()).unwrap();
        assert_eq!(
            extractor.extract("  \n", &task()),
            Err(ExtractError::EmptyDocument)
        );
    }

    #[test]
    fn test_invalid_selector() {
        let mut bad = job();
        bad.next = Some("a[".to_string());
        assert!(matches!(
            SelectorExtractor::from_job(&bad),
            Err(ExtractError::Selector { .. })
        ));
    }

    #[test]
    fn test_first_digit_run() {
        assert_eq!(first_digit_run("/horse/2019104975/"), "2019104975");
        assert_eq!(first_digit_run("abc"), "");
        assert_eq!(first_digit_run("12a34"), "12");
    }
}
