//! DynamoDB-backed `TableStore`. Scans project through expression attribute
//! placeholders, deletes go through `BatchWriteItem`, and throttling error codes
//! are mapped onto [`StoreError::Throttled`] so the collector retries them.
//!
//! Keys travel through the collector as strings (numbers in their wire form).
//! Before deleting, the table's key schema is described once and cached so each
//! key is sent back with the attribute type the table declares.

use crate::store::client::{Item, ScanPage, ScanRequest, StoreError, TableStore};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, ScalarAttributeType, WriteRequest};
use aws_sdk_dynamodb::Client;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

const THROTTLING_CODES: [&str; 3] = [
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "ThrottlingException",
];

/// Declared type of a table's key attribute, keyed by `(table, attribute)`.
type KeyTypes = HashMap<(String, String), ScalarAttributeType>;

#[derive(Debug, Clone)]
pub struct DynamoTableStore {
    client: Client,
    key_types: Arc<Mutex<KeyTypes>>,
}

impl DynamoTableStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            key_types: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Loads the default AWS configuration chain, optionally pinning the region
    /// and overriding the endpoint (e.g. DynamoDB Local).
    pub async fn connect(region: Option<&str>, endpoint_url: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_owned()));
        }
        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn scan_page(
        &self,
        request: &ScanRequest,
        cursor: Option<HashMap<String, AttributeValue>>,
    ) -> Result<ScanPage<HashMap<String, AttributeValue>>, StoreError> {
        let mut names = HashMap::with_capacity(request.projection.len());
        let mut placeholders = Vec::with_capacity(request.projection.len());
        for (index, attribute) in request.projection.iter().enumerate() {
            let placeholder = format!("#a{index}");
            names.insert(placeholder.clone(), attribute.clone());
            placeholders.push(placeholder);
        }

        let mut call = self
            .client
            .scan()
            .table_name(&request.table)
            .set_exclusive_start_key(cursor);
        if !placeholders.is_empty() {
            call = call
                .projection_expression(placeholders.join(", "))
                .set_expression_attribute_names(Some(names));
        }

        let output = call
            .send()
            .await
            .map_err(|err| classify("scan", &request.table, err))?;

        let items = output.items().iter().map(string_attributes).collect();
        Ok(ScanPage {
            items,
            next: output.last_evaluated_key().cloned(),
        })
    }

    /// Looks up (and caches) the declared type of `key_attribute` on `table`.
    async fn key_type(
        &self,
        operation: &'static str,
        table: &str,
        key_attribute: &str,
    ) -> Result<ScalarAttributeType, StoreError> {
        let cache_key = (table.to_owned(), key_attribute.to_owned());
        let cached = self
            .key_types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
            .cloned();
        if let Some(kind) = cached {
            return Ok(kind);
        }

        let output = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|err| classify(operation, table, err))?;

        let kind = output
            .table()
            .and_then(|description| {
                let is_key = description
                    .key_schema()
                    .iter()
                    .any(|element| element.attribute_name() == key_attribute);
                is_key.then(|| {
                    description
                        .attribute_definitions()
                        .iter()
                        .find(|definition| definition.attribute_name() == key_attribute)
                        .map(|definition| definition.attribute_type().clone())
                })
            })
            .flatten()
            .ok_or_else(|| StoreError::InvalidRequest {
                operation,
                table: table.to_owned(),
                message: format!("{key_attribute} is not a key attribute of the table"),
            })?;

        self.key_types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cache_key, kind.clone());
        Ok(kind)
    }

    async fn batch_write_deletes(
        &self,
        table: &str,
        key_attribute: &str,
        keys: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let kind = self.key_type("batch_delete", table, key_attribute).await?;
        let requests = keys
            .iter()
            .map(|key| {
                let value = key_value("batch_delete", table, &kind, key)?;
                let delete = DeleteRequest::builder()
                    .key(key_attribute, value)
                    .build()
                    .map_err(|err| StoreError::InvalidRequest {
                        operation: "batch_delete",
                        table: table.to_owned(),
                        message: err.to_string(),
                    })?;
                Ok(WriteRequest::builder().delete_request(delete).build())
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let output = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .send()
            .await
            .map_err(|err| classify("batch_delete", table, err))?;

        let unprocessed = output
            .unprocessed_items()
            .and_then(|tables| tables.get(table))
            .map(|requests| {
                requests
                    .iter()
                    .filter_map(|request| request.delete_request())
                    .filter_map(|delete| delete.key().get(key_attribute))
                    .filter_map(key_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(unprocessed)
    }

    async fn delete_item(&self, table: &str, key_attribute: &str, key: &str) -> Result<(), StoreError> {
        let kind = self.key_type("delete_one", table, key_attribute).await?;
        let value = key_value("delete_one", table, &kind, key)?;
        self.client
            .delete_item()
            .table_name(table)
            .key(key_attribute, value)
            .send()
            .await
            .map_err(|err| classify("delete_one", table, err))?;
        Ok(())
    }
}

impl TableStore for DynamoTableStore {
    type Cursor = HashMap<String, AttributeValue>;

    fn scan<'a>(
        &'a self,
        request: &'a ScanRequest,
        cursor: Option<Self::Cursor>,
    ) -> BoxFuture<'a, Result<ScanPage<Self::Cursor>, StoreError>> {
        Box::pin(self.scan_page(request, cursor))
    }

    fn batch_delete<'a>(
        &'a self,
        table: &'a str,
        key_attribute: &'a str,
        keys: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(self.batch_write_deletes(table, key_attribute, keys))
    }

    fn delete_one<'a>(
        &'a self,
        table: &'a str,
        key_attribute: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.delete_item(table, key_attribute, key))
    }
}

/// Keeps string and number attributes; numbers stay in their wire form.
fn string_attributes(item: &HashMap<String, AttributeValue>) -> Item {
    item.iter()
        .filter_map(|(name, value)| key_string(value).map(|text| (name.clone(), text)))
        .collect()
}

/// Inverse of [`key_value`]: string and number keys in their wire form.
fn key_string(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::S(text) | AttributeValue::N(text) => Some(text.clone()),
        _ => None,
    }
}

/// Rebuilds a key attribute with the type the table declares.
fn key_value(
    operation: &'static str,
    table: &str,
    kind: &ScalarAttributeType,
    key: &str,
) -> Result<AttributeValue, StoreError> {
    match kind {
        ScalarAttributeType::S => Ok(AttributeValue::S(key.to_owned())),
        ScalarAttributeType::N => Ok(AttributeValue::N(key.to_owned())),
        other => Err(StoreError::InvalidRequest {
            operation,
            table: table.to_owned(),
            message: format!("unsupported key attribute type {}", other.as_str()),
        }),
    }
}

fn classify<E, R>(operation: &'static str, table: &str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let throttled = err
        .code()
        .map(|code| THROTTLING_CODES.contains(&code))
        .unwrap_or(false);
    let message = DisplayErrorContext(&err).to_string();
    if throttled {
        StoreError::Throttled {
            operation,
            table: table.to_owned(),
            message,
        }
    } else {
        StoreError::Backend {
            operation,
            table: table.to_owned(),
            message,
        }
    }
}
