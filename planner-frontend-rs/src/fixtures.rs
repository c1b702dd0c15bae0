//! The bundled default datasets, shown immediately at startup and used to seed an empty store.

use serde_json::Value;

use crate::datasets::{DatasetKey, DatasetKeyMap};

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("Failed to fetch {file}: {message}")]
    Fetch { file: String, message: String },

    #[error("Fetching {file} failed with status {status}")]
    Status { file: String, status: u16 },

    #[error("Failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing fixture {0}")]
    Missing(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fixtures(DatasetKeyMap<Value>);

impl Fixtures {
    /// Build the fixtures from each dataset's JSON text. `lookup` returns `None` for a file that doesn't exist.
    pub fn from_documents(
        mut lookup: impl FnMut(DatasetKey) -> Option<String>,
    ) -> Result<Self, FixtureError> {
        let mut values = DatasetKeyMap::default();
        for key in DatasetKey::ALL {
            let text = lookup(key).ok_or_else(|| FixtureError::Missing(key.fixture_file()));
            values.set(&key, resolve(key, text)?);
        }
        Ok(Fixtures(values))
    }

    pub fn get(&self, key: DatasetKey) -> &Value {
        self.0.get(&key)
    }

    /// Owned copies of every fixture.
    pub fn entries(&self) -> impl Iterator<Item = (DatasetKey, Value)> + '_ {
        self.0.iter().map(|(key, value)| (key, value.clone()))
    }
}

/// Parse one fixture. `pageNotes` is optional: when it is missing or broken the planner starts with no notes.
fn resolve(key: DatasetKey, text: Result<String, FixtureError>) -> Result<Value, FixtureError> {
    let parsed = text.and_then(|text| {
        serde_json::from_str(&text).map_err(|source| FixtureError::Parse {
            file: key.fixture_file(),
            source,
        })
    });
    match parsed {
        Ok(value) => Ok(value),
        Err(e) if key == DatasetKey::PageNotes => {
            log::warn!("Falling back to empty page notes: {e}");
            Ok(key.empty_value())
        }
        Err(e) => Err(e),
    }
}

async fn fetch_fixture(base_url: &str, key: DatasetKey) -> Result<String, FixtureError> {
    let file = key.fixture_file();
    let url = format!("{}/{file}", base_url.trim_end_matches('/'));
    let fetch_error = |e: fetch_happen::Error| FixtureError::Fetch {
        file: file.clone(),
        message: format!("{e:?}"),
    };

    let client = fetch_happen::Client;
    let response = client.get(&url).send().await.map_err(fetch_error)?;
    if !response.ok() {
        return Err(FixtureError::Status {
            file: file.clone(),
            status: u16::from(response.status()),
        });
    }
    response.text().await.map_err(fetch_error)
}

/// Fetch every `data/<key>.json` under `base_url` concurrently.
pub async fn fetch_fixtures(base_url: &str) -> Result<Fixtures, FixtureError> {
    let texts = futures::future::join_all(
        DatasetKey::ALL
            .into_iter()
            .map(|key| fetch_fixture(base_url, key)),
    )
    .await;

    let mut values = DatasetKeyMap::default();
    for (key, text) in DatasetKey::ALL.into_iter().zip(texts) {
        values.set(&key, resolve(key, text)?);
    }
    log::info!("Loaded {} fixtures from {base_url}", DatasetKey::ALL.len());
    Ok(Fixtures(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(key: DatasetKey) -> Option<String> {
        Some(key.empty_value().to_string())
    }

    #[test]
    fn test_page_notes_fall_back_to_empty() {
        let fixtures = Fixtures::from_documents(|key| match key {
            DatasetKey::PageNotes => None,
            other => document(other),
        })
        .unwrap();
        assert_eq!(fixtures.get(DatasetKey::PageNotes), &serde_json::json!({}));

        let fixtures = Fixtures::from_documents(|key| match key {
            DatasetKey::PageNotes => Some("<html>404</html>".to_string()),
            other => document(other),
        })
        .unwrap();
        assert_eq!(fixtures.get(DatasetKey::PageNotes), &serde_json::json!({}));
    }

    #[test]
    fn test_other_fixtures_are_required() {
        let missing = Fixtures::from_documents(|key| match key {
            DatasetKey::Story => None,
            other => document(other),
        });
        assert!(matches!(missing, Err(FixtureError::Missing(file)) if file == "data/story.json"));

        let broken = Fixtures::from_documents(|key| match key {
            DatasetKey::Menu => Some("{".to_string()),
            other => document(other),
        });
        assert!(matches!(broken, Err(FixtureError::Parse { .. })));
    }
}
