//! LanceDB connection helpers and the table recording which generation of
//! each vector index is active.
use anyhow::{anyhow, Result};
use arrow_array::{Int64Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection};
use std::sync::Arc;

pub async fn open_db(uri: &str) -> Result<Connection> {
    Ok(connect(uri).execute().await?)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn.table_names().execute().await?.iter().any(|n| n == name))
}

/// Creates `name` with zero rows unless it already exists.
pub async fn ensure_table(conn: &Connection, name: &str, schema: SchemaRef) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    let empty = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(empty)).execute().await?;
    Ok(())
}

/// One row per index name: `(index_name, generation, activated_at)`.
/// Writing a pointer is an upsert keyed on the index name.
pub struct PointerTable {
    name: String,
}

impl PointerTable {
    pub const DEFAULT_NAME: &'static str = "active_generations";

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("index_name", DataType::Utf8, false),
            Field::new("generation", DataType::Int64, false),
            Field::new("activated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        ]))
    }

    pub async fn write(&self, conn: &Connection, index_name: &str, generation: u64) -> Result<()> {
        ensure_table(conn, &self.name, Self::schema()).await?;
        let table = conn.open_table(&self.name).execute().await?;
        let row = RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(StringArray::from(vec![index_name.to_string()])),
                Arc::new(Int64Array::from(vec![i64::try_from(generation)?])),
                Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
            ],
        )?;
        let rows = Box::new(RecordBatchIterator::new(vec![Ok(row)].into_iter(), Self::schema()));
        let mut upsert = table.merge_insert(&["index_name"]);
        upsert.when_matched_update_all(None).when_not_matched_insert_all();
        upsert.execute(rows).await?;
        Ok(())
    }

    pub async fn read(&self, conn: &Connection, index_name: &str) -> Result<Option<u64>> {
        if !table_exists(conn, &self.name).await? {
            return Ok(None);
        }
        let table = conn.open_table(&self.name).execute().await?;
        let filter = format!("index_name = '{}'", index_name.replace('\'', "''"));
        let mut stream = table.query().only_if(filter).execute().await?;
        while let Some(batch) = stream.try_next().await? {
            if batch.num_rows() == 0 {
                continue;
            }
            let generations = batch
                .column_by_name("generation")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow!("{}.generation column missing", self.name))?;
            let generation = u64::try_from(generations.value(0))
                .map_err(|_| anyhow!("negative generation recorded for '{index_name}'"))?;
            return Ok(Some(generation));
        }
        Ok(None)
    }

    /// Every index name with a recorded generation.
    pub async fn names(&self, conn: &Connection) -> Result<Vec<String>> {
        if !table_exists(conn, &self.name).await? {
            return Ok(Vec::new());
        }
        let table = conn.open_table(&self.name).execute().await?;
        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["index_name"]))
            .execute()
            .await?
            .try_collect()
            .await?;
        let mut names = Vec::new();
        for batch in &batches {
            let column = batch
                .column_by_name("index_name")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow!("{}.index_name column missing", self.name))?;
            names.extend(column.iter().flatten().map(str::to_string));
        }
        Ok(names)
    }
}

impl Default for PointerTable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NAME)
    }
}
