//! Query builders for PostgrestClient

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::error::Error;
use crate::fetch::{Fetch, FetchBuilder};
use crate::postgrest::filter::{FilterOperator, ReturnOption};

/// Where and how a table request is sent
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) url: String,
    pub(crate) key: String,
    pub(crate) token: Option<String>,
    pub(crate) schema: Option<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) client: Client,
}

impl Target {
    /// Attach the API key, the caller's JWT (or the anon key) and the schema profile
    fn prepare<'a>(&self, fetch: FetchBuilder<'a>, read: bool) -> FetchBuilder<'a> {
        let mut fetch = fetch
            .api_key(&self.key)
            .bearer_auth(self.token.as_deref().unwrap_or(&self.key))
            .timeout(self.timeout);
        if let Some(schema) = &self.schema {
            let header = if read { "Accept-Profile" } else { "Content-Profile" };
            fetch = fetch.header(header, schema);
        }
        fetch
    }
}

/// Collected filter parameters, kept in insertion order
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    params: Vec<(String, String)>,
}

impl QueryBuilder {
    /// Create a new QueryBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing an earlier value for the same key
    pub fn set_param(&mut self, key: &str, value: &str) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value.to_string()));
    }

    /// Add a parameter without replacing earlier ones
    pub fn add_param(&mut self, key: &str, value: &str) {
        self.params.push((key.to_string(), value.to_string()));
    }

    /// Get the query parameters
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Builder for SELECT queries
pub struct SelectBuilder {
    target: Target,
    query: QueryBuilder,
}

impl SelectBuilder {
    pub(crate) fn new(target: Target, columns: &str) -> Self {
        let mut query = QueryBuilder::new();
        query.set_param("select", columns);
        Self { target, query }
    }

    fn filter<T: ToString>(mut self, column: &str, operator: FilterOperator, value: T) -> Self {
        self.query.add_param(column, &operator.param(value));
        self
    }

    /// Filter rows where column equals a value
    pub fn eq<T: ToString>(self, column: &str, value: T) -> Self {
        self.filter(column, FilterOperator::Eq, value)
    }

    /// Order the results by a column
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.query.set_param("order", &format!("{}.{}", column, direction));
        self
    }

    /// Execute the query and return the results
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<Vec<T>, Error> {
        let fetch = self
            .target
            .prepare(Fetch::get(&self.target.client, &self.target.url), true)
            .query(self.query.params());

        fetch.execute::<Vec<T>>().await.map_err(database_failure)
    }
}

/// Builder for INSERT queries
pub struct InsertBuilder<T: Serialize> {
    target: Target,
    values: T,
}

impl<T: Serialize> InsertBuilder<T> {
    pub(crate) fn new(target: Target, values: T) -> Self {
        Self { target, values }
    }

    /// Execute the insert and return the inserted rows
    pub async fn execute<R: DeserializeOwned>(&self) -> Result<Vec<R>, Error> {
        let fetch = self
            .target
            .prepare(Fetch::post(&self.target.client, &self.target.url), false)
            .header("Prefer", ReturnOption::Representation.prefer_header())
            .json(&self.values)?;

        fetch.execute::<Vec<R>>().await.map_err(database_failure)
    }
}

/// Builder for DELETE queries
pub struct DeleteBuilder {
    target: Target,
    query: QueryBuilder,
}

impl DeleteBuilder {
    pub(crate) fn new(target: Target) -> Self {
        Self {
            target,
            query: QueryBuilder::new(),
        }
    }

    /// Filter rows where column equals a value
    pub fn eq<V: ToString>(mut self, column: &str, value: V) -> Self {
        self.query.add_param(column, &FilterOperator::Eq.param(value));
        self
    }

    /// Execute the delete without returning the deleted rows
    pub async fn execute(&self) -> Result<(), Error> {
        // PostgREST refuses unfiltered deletes only when configured to; never send one
        if self.query.params().is_empty() {
            return Err(Error::database("refusing to delete without a filter"));
        }

        let fetch = self
            .target
            .prepare(Fetch::delete(&self.target.client, &self.target.url), false)
            .header("Prefer", ReturnOption::Minimal.prefer_header())
            .query(self.query.params());

        fetch.execute_empty().await.map_err(database_failure)
    }
}

fn database_failure(e: Error) -> Error {
    match e {
        Error::Api { status, message } if status != 401 && status != 403 => {
            Error::database(format!("{} ({})", message, status))
        }
        other => other,
    }
}
