use serde::{Deserialize, Serialize};

/// A dashboard as listed by the account's Emoncms instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
}

impl Dashboard {
    /// URL that opens this dashboard in a browser, authenticated with the read key.
    pub fn url(&self, endpoint_url: &str, api_key: &str) -> String {
        format!(
            "{}/dashboard/view?id={}&apikey={}",
            endpoint_url.trim_end_matches('/'),
            self.id,
            api_key
        )
    }
}
