// src/table/dynamo.rs

//! DynamoDB table store client.
//!
//! Implements [`TableStoreClient`] on top of `aws-sdk-dynamodb`. Records map
//! to items whose key attributes are named by the [`TableSchema`] the client
//! was built with; preconditions become condition expressions and a
//! `ConditionalCheckFailedException` maps to `WriteOutcome::ConditionFailed`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};
use bytes::Bytes;

use super::client::{Page, Precondition, TableSchema, TableStoreClient, WriteOutcome};
use super::record::{FieldValue, Record, TableKey};
use crate::error::{Result, StoreError};

/// [`TableStoreClient`] backed by DynamoDB.
pub struct DynamoTableStore {
    client: aws_sdk_dynamodb::Client,
    schema: TableSchema,
}

impl DynamoTableStore {
    /// Wraps an already-configured SDK client using the default key
    /// attribute names.
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self {
            client,
            schema: TableSchema::default(),
        }
    }

    /// Overrides the key attribute names items are stored under.
    #[must_use]
    pub fn with_schema(mut self, schema: TableSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Builds a client from the environment's AWS configuration.
    pub async fn from_env() -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(aws_sdk_dynamodb::Client::new(&shared))
    }

    fn request_error<E>(table: &str, action: &str, err: &SdkError<E>) -> StoreError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::table_store(
            table,
            format!("{} failed: {}", action, DisplayErrorContext(err)),
        )
    }

    fn key_attributes(&self, key: &TableKey) -> HashMap<String, AttributeValue> {
        let mut attributes = HashMap::new();
        attributes.insert(
            self.schema.hash_attr.clone(),
            AttributeValue::S(key.hash_key.clone()),
        );
        attributes.insert(
            self.schema.range_attr.clone(),
            AttributeValue::S(key.range_key.clone()),
        );
        attributes
    }

    fn to_item(&self, record: &Record) -> HashMap<String, AttributeValue> {
        let mut item = self.key_attributes(&record.key);
        for (name, value) in &record.fields {
            item.insert(name.clone(), to_attribute(value));
        }
        item
    }

    fn from_item(&self, table: &str, item: &HashMap<String, AttributeValue>) -> Result<Record> {
        let hash_key = match item.get(&self.schema.hash_attr) {
            Some(AttributeValue::S(s)) => s.clone(),
            _ => {
                return Err(StoreError::table_store(
                    table,
                    format!("item is missing key attribute '{}'", self.schema.hash_attr),
                ));
            }
        };
        let range_key = match item.get(&self.schema.range_attr) {
            Some(AttributeValue::S(s)) => s.clone(),
            _ => {
                return Err(StoreError::table_store(
                    table,
                    format!("item is missing key attribute '{}'", self.schema.range_attr),
                ));
            }
        };

        let mut record = Record::new(TableKey::new(hash_key, range_key));
        for (name, value) in item {
            if name == &self.schema.hash_attr || name == &self.schema.range_attr {
                continue;
            }
            record
                .fields
                .insert(name.clone(), from_attribute(table, name, value)?);
        }
        Ok(record)
    }
}

fn to_attribute(value: &FieldValue) -> AttributeValue {
    match value {
        FieldValue::S(s) => AttributeValue::S(s.clone()),
        FieldValue::N(n) => AttributeValue::N(n.to_string()),
        FieldValue::F(f) => AttributeValue::N(f.to_string()),
        FieldValue::Bool(b) => AttributeValue::Bool(*b),
        FieldValue::B(b) => AttributeValue::B(Blob::new(b.to_vec())),
    }
}

fn from_attribute(table: &str, name: &str, value: &AttributeValue) -> Result<FieldValue> {
    match value {
        AttributeValue::S(s) => Ok(FieldValue::S(s.clone())),
        AttributeValue::N(n) => {
            if let Ok(int) = n.parse::<i64>() {
                Ok(FieldValue::N(int))
            } else {
                n.parse::<f64>().map(FieldValue::F).map_err(|_| {
                    StoreError::table_store(
                        table,
                        format!("attribute '{}' holds an unparseable number", name),
                    )
                })
            }
        }
        AttributeValue::Bool(b) => Ok(FieldValue::Bool(*b)),
        AttributeValue::B(blob) => Ok(FieldValue::B(Bytes::from(blob.clone().into_inner()))),
        other => Err(StoreError::table_store(
            table,
            format!("attribute '{}' has an unsupported shape: {:?}", name, other),
        )),
    }
}

#[async_trait]
impl TableStoreClient for DynamoTableStore {
    async fn get_item(&self, table: &str, key: &TableKey) -> Result<Option<Record>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(self.key_attributes(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| Self::request_error(table, "get item", &e))?;

        match output.item() {
            Some(item) => Ok(Some(self.from_item(table, item)?)),
            None => Ok(None),
        }
    }

    async fn update_item(
        &self,
        table: &str,
        record: Record,
        precondition: Option<&Precondition>,
    ) -> Result<WriteOutcome> {
        let mut request = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(self.to_item(&record)));

        if let Some(precondition) = precondition {
            match precondition {
                Precondition::FieldEquals { field, value } => {
                    request = request
                        .condition_expression("#f = :v")
                        .expression_attribute_names("#f", field)
                        .expression_attribute_values(":v", to_attribute(value));
                }
                Precondition::FieldAbsent { field } => {
                    request = request
                        .condition_expression("attribute_not_exists(#f)")
                        .expression_attribute_names("#f", field);
                }
            }
        }

        match request.send().await {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(SdkError::ServiceError(service_err))
                if matches!(
                    service_err.err(),
                    PutItemError::ConditionalCheckFailedException(_)
                ) =>
            {
                Ok(WriteOutcome::ConditionFailed)
            }
            Err(err) => Err(Self::request_error(table, "conditional put", &err)),
        }
    }

    async fn query(
        &self,
        table: &str,
        hash_key: &str,
        start_token: Option<&str>,
    ) -> Result<Page> {
        let mut request = self
            .client
            .query()
            .table_name(table)
            .key_condition_expression("#h = :h")
            .expression_attribute_names("#h", &self.schema.hash_attr)
            .expression_attribute_values(":h", AttributeValue::S(hash_key.to_string()));

        // The continuation token is the range key of the last record of the
        // previous page.
        if let Some(token) = start_token {
            let mut start = HashMap::new();
            start.insert(
                self.schema.hash_attr.clone(),
                AttributeValue::S(hash_key.to_string()),
            );
            start.insert(
                self.schema.range_attr.clone(),
                AttributeValue::S(token.to_string()),
            );
            request = request.set_exclusive_start_key(Some(start));
        }

        let output = request
            .send()
            .await
            .map_err(|e| Self::request_error(table, "query", &e))?;

        let mut records = Vec::new();
        for item in output.items() {
            records.push(self.from_item(table, item)?);
        }

        let next_token = output
            .last_evaluated_key()
            .and_then(|key| key.get(&self.schema.range_attr))
            .and_then(|value| match value {
                AttributeValue::S(s) => Some(s.clone()),
                _ => None,
            });

        Ok(Page {
            records,
            next_token,
        })
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let hash_attr = AttributeDefinition::builder()
            .attribute_name(&schema.hash_attr)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| StoreError::table_store(table, format!("invalid schema: {}", e)))?;
        let range_attr = AttributeDefinition::builder()
            .attribute_name(&schema.range_attr)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| StoreError::table_store(table, format!("invalid schema: {}", e)))?;
        let hash_schema = KeySchemaElement::builder()
            .attribute_name(&schema.hash_attr)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| StoreError::table_store(table, format!("invalid schema: {}", e)))?;
        let range_schema = KeySchemaElement::builder()
            .attribute_name(&schema.range_attr)
            .key_type(KeyType::Range)
            .build()
            .map_err(|e| StoreError::table_store(table, format!("invalid schema: {}", e)))?;

        let result = self
            .client
            .create_table()
            .table_name(table)
            .attribute_definitions(hash_attr)
            .attribute_definitions(range_attr)
            .key_schema(hash_schema)
            .key_schema(range_schema)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(service_err))
                if matches!(
                    service_err.err(),
                    CreateTableError::ResourceInUseException(_)
                ) =>
            {
                Err(StoreError::table_store(table, "table already exists"))
            }
            Err(err) => Err(Self::request_error(table, "create table", &err)),
        }
    }
}
