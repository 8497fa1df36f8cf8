//! [`StoreTransport`] over the DynamoDB SDK client.

use crate::convert::{Placeholders, SdkItem, from_sdk_item, to_sdk_item};
use crate::error::{cancellation, classify, from_service_code};
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{BuildError, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::transact_get_items::TransactGetItemsError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    ConditionCheck, Delete, DeleteRequest, Get, KeysAndAttributes, Put, PutRequest, ReturnValue,
    TransactGetItem, TransactWriteItem as SdkTransactWriteItem, Update,
    WriteRequest as SdkWriteRequest,
};
use std::collections::HashMap;
use tablecraft_store::{
    BatchGet, BatchGetOutput, BatchWrite, BatchWriteOutput, DeleteItem, GetItem, PutItem, Query,
    QueryOutput, StoreTransport, TableItem, TableKey, TransactGet, TransactWrite,
    TransactWriteItem, TransportError, TransportResult, UpdateItem, WriteRequest,
};
use tablecraft_types::{Expression, Item};
use tracing::{debug, trace};

fn build_failed(err: BuildError) -> TransportError {
    TransportError::validation(format!("cannot build request: {err}"))
}

fn optional_item(item: Option<&SdkItem>) -> TransportResult<Option<Item>> {
    item.map(from_sdk_item).transpose()
}

/// DynamoDB-backed transport.
#[derive(Clone)]
pub struct DynamoDbTransport {
    client: Client,
}

impl std::fmt::Debug for DynamoDbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbTransport").finish_non_exhaustive()
    }
}

impl DynamoDbTransport {
    /// Wraps a pre-built client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn transact_item(item: &TransactWriteItem) -> TransportResult<SdkTransactWriteItem> {
        let builder = SdkTransactWriteItem::builder();
        let builder = match item {
            TransactWriteItem::Put(put) => {
                let placeholders = Placeholders::merge(put.condition.as_ref())?;
                builder.put(
                    Put::builder()
                        .table_name(&put.table)
                        .set_item(Some(to_sdk_item(&put.item)))
                        .set_condition_expression(put.condition.as_ref().map(|c| c.text.clone()))
                        .set_expression_attribute_names(placeholders.names)
                        .set_expression_attribute_values(placeholders.values)
                        .build()
                        .map_err(build_failed)?,
                )
            }
            TransactWriteItem::Update(update) => {
                let placeholders =
                    Placeholders::merge(std::iter::once(&update.update).chain(&update.condition))?;
                builder.update(
                    Update::builder()
                        .table_name(&update.table)
                        .set_key(Some(to_sdk_item(&update.key)))
                        .update_expression(&update.update.text)
                        .set_condition_expression(update.condition.as_ref().map(|c| c.text.clone()))
                        .set_expression_attribute_names(placeholders.names)
                        .set_expression_attribute_values(placeholders.values)
                        .build()
                        .map_err(build_failed)?,
                )
            }
            TransactWriteItem::Delete(delete) => {
                let placeholders = Placeholders::merge(delete.condition.as_ref())?;
                builder.delete(
                    Delete::builder()
                        .table_name(&delete.table)
                        .set_key(Some(to_sdk_item(&delete.key)))
                        .set_condition_expression(delete.condition.as_ref().map(|c| c.text.clone()))
                        .set_expression_attribute_names(placeholders.names)
                        .set_expression_attribute_values(placeholders.values)
                        .build()
                        .map_err(build_failed)?,
                )
            }
            TransactWriteItem::ConditionCheck { table, key, condition } => {
                let placeholders = Placeholders::merge([condition])?;
                builder.condition_check(
                    ConditionCheck::builder()
                        .table_name(table)
                        .set_key(Some(to_sdk_item(key)))
                        .condition_expression(&condition.text)
                        .set_expression_attribute_names(placeholders.names)
                        .set_expression_attribute_values(placeholders.values)
                        .build()
                        .map_err(build_failed)?,
                )
            }
        };
        Ok(builder.build())
    }

    fn batch_write_request(write: &WriteRequest) -> TransportResult<(String, SdkWriteRequest)> {
        let request = match write {
            WriteRequest::Put { item, .. } => SdkWriteRequest::builder().put_request(
                PutRequest::builder()
                    .set_item(Some(to_sdk_item(item)))
                    .build()
                    .map_err(build_failed)?,
            ),
            WriteRequest::Delete { key, .. } => SdkWriteRequest::builder().delete_request(
                DeleteRequest::builder()
                    .set_key(Some(to_sdk_item(key)))
                    .build()
                    .map_err(build_failed)?,
            ),
        };
        Ok((write.table().to_string(), request.build()))
    }

    fn unprocessed_write(table: &str, request: &SdkWriteRequest) -> TransportResult<WriteRequest> {
        if let Some(put) = &request.put_request {
            return Ok(WriteRequest::Put {
                table: table.to_string(),
                item: from_sdk_item(&put.item)?,
            });
        }
        if let Some(delete) = &request.delete_request {
            return Ok(WriteRequest::Delete {
                table: table.to_string(),
                key: from_sdk_item(&delete.key)?,
            });
        }
        Err(TransportError::validation("unprocessed write carries no request"))
    }
}

#[async_trait]
impl StoreTransport for DynamoDbTransport {
    fn name(&self) -> &'static str {
        "dynamodb"
    }

    async fn get_item(&self, request: GetItem) -> TransportResult<Option<Item>> {
        let projection = request.projection.as_deref().map(Expression::projection);
        let placeholders = Placeholders::merge(projection.as_ref())?;
        let output = self
            .client
            .get_item()
            .table_name(&request.table)
            .set_key(Some(to_sdk_item(&request.key)))
            .consistent_read(request.consistent_read)
            .set_projection_expression(projection.map(|p| p.text))
            .set_expression_attribute_names(placeholders.names)
            .send()
            .await
            .map_err(|e| classify("GetItem", e))?;
        optional_item(output.item.as_ref())
    }

    async fn put_item(&self, request: PutItem) -> TransportResult<()> {
        let placeholders = Placeholders::merge(request.condition.as_ref())?;
        self.client
            .put_item()
            .table_name(&request.table)
            .set_item(Some(to_sdk_item(&request.item)))
            .set_condition_expression(request.condition.map(|c| c.text))
            .set_expression_attribute_names(placeholders.names)
            .set_expression_attribute_values(placeholders.values)
            .send()
            .await
            .map_err(|e| classify("PutItem", e))?;
        trace!(table = %request.table, "put item");
        Ok(())
    }

    async fn update_item(&self, request: UpdateItem) -> TransportResult<Item> {
        let placeholders =
            Placeholders::merge(std::iter::once(&request.update).chain(&request.condition))?;
        let output = self
            .client
            .update_item()
            .table_name(&request.table)
            .set_key(Some(to_sdk_item(&request.key)))
            .update_expression(request.update.text)
            .set_condition_expression(request.condition.map(|c| c.text))
            .set_expression_attribute_names(placeholders.names)
            .set_expression_attribute_values(placeholders.values)
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| classify("UpdateItem", e))?;
        Ok(optional_item(output.attributes.as_ref())?.unwrap_or_default())
    }

    async fn delete_item(&self, request: DeleteItem) -> TransportResult<Option<Item>> {
        let placeholders = Placeholders::merge(request.condition.as_ref())?;
        let output = self
            .client
            .delete_item()
            .table_name(&request.table)
            .set_key(Some(to_sdk_item(&request.key)))
            .set_condition_expression(request.condition.map(|c| c.text))
            .set_expression_attribute_names(placeholders.names)
            .set_expression_attribute_values(placeholders.values)
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| classify("DeleteItem", e))?;
        optional_item(output.attributes.as_ref())
    }

    async fn query(&self, request: Query) -> TransportResult<QueryOutput> {
        let key_condition = request.key_condition.to_expression();
        let projection = request.projection.as_deref().map(Expression::projection);
        let placeholders = Placeholders::merge(
            std::iter::once(&key_condition)
                .chain(&request.filter)
                .chain(&projection),
        )?;
        let limit = request
            .limit
            .map(|l| i32::try_from(l).unwrap_or(i32::MAX));
        let output = self
            .client
            .query()
            .table_name(&request.table)
            .set_index_name(request.key_condition.index_name.clone())
            .key_condition_expression(key_condition.text)
            .set_filter_expression(request.filter.map(|f| f.text))
            .set_projection_expression(projection.map(|p| p.text))
            .set_expression_attribute_names(placeholders.names)
            .set_expression_attribute_values(placeholders.values)
            .set_limit(limit)
            .scan_index_forward(request.scan_forward)
            .set_exclusive_start_key(request.exclusive_start_key.as_ref().map(to_sdk_item))
            .consistent_read(request.consistent_read)
            .send()
            .await
            .map_err(|e| classify("Query", e))?;

        let items = output
            .items
            .unwrap_or_default()
            .iter()
            .map(from_sdk_item)
            .collect::<TransportResult<Vec<_>>>()?;
        debug!(table = %request.table, index = ?request.key_condition.index_name, returned = items.len(), "query");
        Ok(QueryOutput {
            items,
            last_evaluated_key: optional_item(output.last_evaluated_key.as_ref())?,
        })
    }

    async fn batch_get(&self, request: BatchGet) -> TransportResult<BatchGetOutput> {
        let mut by_table: HashMap<String, Vec<SdkItem>> = HashMap::new();
        for key in &request.keys {
            by_table
                .entry(key.table.clone())
                .or_default()
                .push(to_sdk_item(&key.key));
        }
        let mut call = self.client.batch_get_item();
        for (table, keys) in by_table {
            let keys = KeysAndAttributes::builder()
                .set_keys(Some(keys))
                .build()
                .map_err(build_failed)?;
            call = call.request_items(table, keys);
        }
        let output = call.send().await.map_err(|e| classify("BatchGetItem", e))?;

        let mut result = BatchGetOutput::default();
        for (table, items) in output.responses.unwrap_or_default() {
            for item in &items {
                result.items.push(TableItem {
                    table: table.clone(),
                    item: from_sdk_item(item)?,
                });
            }
        }
        for (table, keys) in output.unprocessed_keys.unwrap_or_default() {
            for key in &keys.keys {
                result.unprocessed.push(TableKey::new(table.clone(), from_sdk_item(key)?));
            }
        }
        Ok(result)
    }

    async fn batch_write(&self, request: BatchWrite) -> TransportResult<BatchWriteOutput> {
        let mut by_table: HashMap<String, Vec<SdkWriteRequest>> = HashMap::new();
        for write in &request.writes {
            let (table, sdk_request) = Self::batch_write_request(write)?;
            by_table.entry(table).or_default().push(sdk_request);
        }
        let output = self
            .client
            .batch_write_item()
            .set_request_items(Some(by_table))
            .send()
            .await
            .map_err(|e| classify("BatchWriteItem", e))?;

        let mut result = BatchWriteOutput::default();
        for (table, writes) in output.unprocessed_items.unwrap_or_default() {
            for write in &writes {
                result.unprocessed.push(Self::unprocessed_write(&table, write)?);
            }
        }
        Ok(result)
    }

    async fn transact_write(&self, request: TransactWrite) -> TransportResult<()> {
        let items = request
            .items
            .iter()
            .map(Self::transact_item)
            .collect::<TransportResult<Vec<_>>>()?;
        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .set_client_request_token(request.client_request_token)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(service)) => match service.into_err() {
                TransactWriteItemsError::TransactionCanceledException(canceled) => {
                    Err(cancellation(canceled.cancellation_reasons()))
                }
                other => Err(from_service_code(other.code(), other.message())),
            },
            Err(err) => Err(classify("TransactWriteItems", err)),
        }
    }

    async fn transact_get(&self, request: TransactGet) -> TransportResult<Vec<Option<Item>>> {
        let items = request
            .keys
            .iter()
            .map(|key| {
                let get = Get::builder()
                    .table_name(&key.table)
                    .set_key(Some(to_sdk_item(&key.key)))
                    .build()
                    .map_err(build_failed)?;
                Ok(TransactGetItem::builder().get(get).build())
            })
            .collect::<TransportResult<Vec<_>>>()?;
        let output = match self
            .client
            .transact_get_items()
            .set_transact_items(Some(items))
            .send()
            .await
        {
            Ok(output) => output,
            Err(SdkError::ServiceError(service)) => {
                return Err(match service.into_err() {
                    TransactGetItemsError::TransactionCanceledException(canceled) => {
                        cancellation(canceled.cancellation_reasons())
                    }
                    other => from_service_code(other.code(), other.message()),
                });
            }
            Err(err) => return Err(classify("TransactGetItems", err)),
        };
        output
            .responses
            .unwrap_or_default()
            .iter()
            .map(|response| optional_item(response.item.as_ref()))
            .collect()
    }
}
