use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use url::Url;

use mosaic_core::{PopularSite, SectionType, TileTitleSource};
use mosaic_logging::mosaic_trace;

#[derive(Debug, Error)]
pub enum CatalogParseError {
    #[error("catalog payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog payload is not an array")]
    NotAnArray,
}

/// Parses a popular-sites catalog payload. Version 6 introduced the
/// sectioned shape (`[{section, sites}, ..]`); earlier versions are a
/// flat site array placed wholesale in the `Personalized` section.
///
/// A malformed top-level payload fails the whole parse; individual
/// malformed site entries are merely skipped.
pub fn parse_catalog(
    raw: &str,
    version: u32,
) -> Result<BTreeMap<SectionType, Vec<PopularSite>>, CatalogParseError> {
    let payload: Value = serde_json::from_str(raw)?;
    let Value::Array(entries) = payload else {
        return Err(CatalogParseError::NotAnArray);
    };
    if version >= 6 {
        Ok(parse_sectioned(&entries))
    } else {
        let mut sections = BTreeMap::new();
        sections.insert(SectionType::Personalized, parse_sites(&entries));
        Ok(sections)
    }
}

fn parse_sectioned(entries: &[Value]) -> BTreeMap<SectionType, Vec<PopularSite>> {
    let mut sections = BTreeMap::new();
    for entry in entries {
        let Some(section_id) = entry.get("section").and_then(Value::as_i64) else {
            continue;
        };
        let Some(section) = SectionType::from_wire(section_id) else {
            continue;
        };
        let sites = entry
            .get("sites")
            .and_then(Value::as_array)
            .map(|sites| parse_sites(sites))
            .unwrap_or_default();
        // Only the personalized section participates in merging; the
        // others are understood but dropped.
        if section == SectionType::Personalized {
            sections.insert(section, sites);
        } else {
            mosaic_trace!("Discarding catalog section {section:?} with {} sites", sites.len());
        }
    }
    sections
}

fn parse_sites(entries: &[Value]) -> Vec<PopularSite> {
    entries.iter().filter_map(parse_site).collect()
}

fn parse_site(entry: &Value) -> Option<PopularSite> {
    let title = entry.get("title")?.as_str()?.to_string();
    let url = Url::parse(entry.get("url")?.as_str()?).ok()?;
    let favicon_url = parse_optional_url(entry, "favicon_url");
    let large_icon_url = parse_optional_url(entry, "large_icon_url");
    // Catalogs older than the title_source field only carried titles
    // scraped from the title tag.
    let title_source = entry
        .get("title_source")
        .and_then(Value::as_i64)
        .map(TileTitleSource::from_wire)
        .unwrap_or(TileTitleSource::TitleTag);
    let baked_in = entry
        .get("baked_in")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let default_icon_resource = entry
        .get("default_icon_resource")
        .and_then(Value::as_i64)
        .map(|resource| resource as i32)
        .unwrap_or(-1);
    Some(PopularSite {
        title,
        url,
        favicon_url,
        large_icon_url,
        title_source,
        baked_in,
        default_icon_resource,
    })
}

fn parse_optional_url(entry: &Value, key: &str) -> Option<Url> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| Url::parse(raw).ok())
}
