//! Database operations through the PostgREST API

mod filter;
mod query;

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

pub use filter::*;
pub use query::*;

/// Client for operations on one table
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    target: Target,
}

impl PostgrestClient {
    /// Create a new PostgrestClient
    pub fn new(url: &str, key: &str, table: &str, client: Client) -> Self {
        Self {
            target: Target {
                url: format!("{}/rest/v1/{}", url.trim_end_matches('/'), table),
                key: key.to_string(),
                token: None,
                schema: None,
                timeout: None,
                client,
            },
        }
    }

    /// Send requests with the user's access token instead of the anon key
    pub fn with_auth(mut self, token: &str) -> Self {
        self.target.token = Some(token.to_string());
        self
    }

    /// Address a schema other than the one exposed by default
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.target.schema = Some(schema.to_string());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.target.timeout = timeout;
        self
    }

    /// Select specific columns from the table
    pub fn select(&self, columns: &str) -> SelectBuilder {
        SelectBuilder::new(self.target.clone(), columns)
    }

    /// Insert data into the table
    pub fn insert<T: Serialize>(&self, values: T) -> InsertBuilder<T> {
        InsertBuilder::new(self.target.clone(), values)
    }

    /// Delete data from the table
    pub fn delete(&self) -> DeleteBuilder {
        DeleteBuilder::new(self.target.clone())
    }
}
