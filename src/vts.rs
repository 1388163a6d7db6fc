use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::xml::Element;

/// One selectable vulnerability test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vt {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub creation_time: String,
    #[serde(default)]
    pub modification_time: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct VtFeed {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    vts: Vec<Vt>,
}

/// The loaded VT catalogue. Immutable after startup, so response streaming
/// never races a feed mutation.
#[derive(Debug, Default)]
pub struct VtCollection {
    vts: BTreeMap<String, Vt>,
    feed_version: Option<String>,
    sha256_hash: Option<String>,
}

impl VtCollection {
    pub fn new(vts: Vec<Vt>, feed_version: Option<String>) -> Self {
        let vts: BTreeMap<String, Vt> = vts.into_iter().map(|vt| (vt.id.clone(), vt)).collect();
        let sha256_hash = if vts.is_empty() {
            None
        } else {
            Some(content_hash(&vts))
        };
        VtCollection {
            vts,
            feed_version,
            sha256_hash,
        }
    }

    /// An empty catalogue for daemons started without a feed file.
    pub fn empty() -> Self {
        VtCollection::default()
    }

    /// Load a JSON feed file: `{"version": "...", "vts": [...]}`.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read VT feed: {}", path.as_ref().display()))?;
        let feed: VtFeed = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse VT feed: {}", path.as_ref().display()))?;
        let collection = VtCollection::new(feed.vts, feed.version);
        info!(total = collection.len(), "loaded VT feed");
        Ok(collection)
    }

    pub fn len(&self) -> usize {
        self.vts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vts.is_empty()
    }

    pub fn contains(&self, vt_id: &str) -> bool {
        self.vts.contains_key(vt_id)
    }

    pub fn get(&self, vt_id: &str) -> Option<&Vt> {
        self.vts.get(vt_id)
    }

    /// All VT ids in stable (sorted) order.
    pub fn ids(&self) -> Vec<String> {
        self.vts.keys().cloned().collect()
    }

    pub fn sha256_hash(&self) -> Option<&str> {
        self.sha256_hash.as_deref()
    }

    pub fn feed_version(&self) -> Option<&str> {
        self.feed_version.as_deref()
    }

    /// Apply a filter expression and return the matching VT ids in stable
    /// order. Clauses are `;`-separated and all must hold; each clause is
    /// `key=value`, `key>value` or `key<value` over the fields `id`, `name`,
    /// `family`, `category`, `creation_time` and `modification_time`.
    /// Clauses naming an unknown key match nothing.
    pub fn filter(&self, expression: &str) -> Vec<String> {
        let clauses: Vec<&str> = expression
            .split(';')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        self.vts
            .values()
            .filter(|vt| clauses.iter().all(|c| clause_matches(vt, c)))
            .map(|vt| vt.id.clone())
            .collect()
    }

    /// XML representation of one VT. Without details only the id attribute
    /// and name are emitted.
    pub fn vt_xml(&self, vt: &Vt, details: bool) -> Element {
        let mut el = Element::new("vt").attr("id", vt.id.clone());
        el.children.push(Element::with_text("name", vt.name.clone()));

        if details {
            el.children
                .push(Element::with_text("family", vt.family.clone()));
            el.children
                .push(Element::with_text("category", vt.category.clone()));
            el.children.push(Element::with_text(
                "creation_time",
                vt.creation_time.clone(),
            ));
            el.children.push(Element::with_text(
                "modification_time",
                vt.modification_time.clone(),
            ));
            el.children
                .push(Element::with_text("summary", vt.summary.clone()));
            el.children
                .push(Element::with_text("severities", vt.severity.clone()));
            if !vt.params.is_empty() {
                let mut params = Element::new("params");
                for (id, value) in &vt.params {
                    params
                        .children
                        .push(Element::with_text("param", value.clone()).attr("id", id.clone()));
                }
                el.children.push(params);
            }
        }

        el
    }
}

fn clause_matches(vt: &Vt, clause: &str) -> bool {
    let (key, op, value) = if let Some((k, v)) = clause.split_once('=') {
        (k.trim(), '=', v.trim())
    } else if let Some((k, v)) = clause.split_once('>') {
        (k.trim(), '>', v.trim())
    } else if let Some((k, v)) = clause.split_once('<') {
        (k.trim(), '<', v.trim())
    } else {
        return false;
    };

    let field = match key {
        "id" => &vt.id,
        "name" => &vt.name,
        "family" => &vt.family,
        "category" => &vt.category,
        "creation_time" => &vt.creation_time,
        "modification_time" => &vt.modification_time,
        _ => return false,
    };

    match op {
        '=' => field == value,
        '>' => field.as_str() > value,
        '<' => field.as_str() < value,
        _ => false,
    }
}

/// Content hash over ids and modification times, in sorted id order, so the
/// client can detect feed changes without fetching the whole catalogue.
fn content_hash(vts: &BTreeMap<String, Vt>) -> String {
    let mut hasher = Sha256::new();
    for (id, vt) in vts {
        hasher.update(id.as_bytes());
        hasher.update(vt.modification_time.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
