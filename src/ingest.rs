//! The ingestion pipeline.
//!
//! One [`IngestionPipeline::ingest_file`] call processes one upload
//! descriptor end to end: load, chunk, embed, persist. Progress is
//! streamed as [`StatusReport`]s; a closed report channel means the
//! client is gone and the task cancels itself, rolling back anything
//! it already wrote. Failures roll back the same way and surface as a
//! single terminal `ERROR` report.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::embedder::vectorize_checked;
use crate::error::{Result, VerbaError};
use crate::models::{Document, FileConfig, FileStatus, StatusReport};
use crate::registry::Registry;
use crate::store::{self, VectorStore};

pub struct IngestionPipeline {
    store: Arc<dyn VectorStore>,
    registry: Arc<Registry>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn VectorStore>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Run the full pipeline for one upload. Never panics the task:
    /// every failure ends in a rollback, and all but cancellation end
    /// in one terminal `ERROR` report.
    pub async fn ingest_file(&self, file: FileConfig, reports: mpsc::Sender<StatusReport>) {
        let file_id = file.file_id.clone();
        let mut inserted: Vec<String> = Vec::new();

        if let Err(err) = self.run(&file, &reports, &mut inserted).await {
            for uuid in &inserted {
                if let Err(e) = store::delete_document(self.store.as_ref(), uuid).await {
                    tracing::error!(uuid, error = %e, "rollback failed");
                }
            }
            match err {
                VerbaError::Cancelled => {
                    tracing::info!(file_id, "ingestion cancelled, rolled back");
                }
                err => {
                    tracing::warn!(file_id, error = %err, "ingestion failed");
                    let _ = reports
                        .send(StatusReport::new(
                            &file_id,
                            FileStatus::Error,
                            err.to_string(),
                            0.0,
                        ))
                        .await;
                }
            }
        }
    }

    async fn send(
        &self,
        reports: &mpsc::Sender<StatusReport>,
        report: StatusReport,
    ) -> Result<()> {
        reports.send(report).await.map_err(|_| VerbaError::Cancelled)
    }

    async fn run(
        &self,
        file: &FileConfig,
        reports: &mpsc::Sender<StatusReport>,
        inserted: &mut Vec<String>,
    ) -> Result<()> {
        let file_id = &file.file_id;
        let total = Instant::now();
        self.send(
            reports,
            StatusReport::new(file_id, FileStatus::Starting, "starting ingestion", 0.0),
        )
        .await?;

        // Duplicate policy on the upload name, before any work.
        if let Some(existing) =
            store::exists_document_with_title(self.store.as_ref(), &file.filename).await?
        {
            if file.overwrite {
                store::delete_document(self.store.as_ref(), &existing).await?;
            } else {
                return Err(VerbaError::Duplicate(format!(
                    "a document named '{}' already exists",
                    file.filename
                )));
            }
        }

        // Load.
        let stage = Instant::now();
        let reader_entry = file.rag_config.reader.selected_entry()?;
        let reader = self.registry.reader(&reader_entry.name)?;
        let mut docs = reader.load(reader_entry, file).await?;
        self.check_part_duplicates(file, &docs).await?;
        self.send(
            reports,
            StatusReport::new(
                file_id,
                FileStatus::Loading,
                format!("loaded {} document(s)", docs.len()),
                stage.elapsed().as_secs_f64(),
            ),
        )
        .await?;

        // Chunk.
        let stage = Instant::now();
        let chunker_entry = file.rag_config.chunker.selected_entry()?;
        let chunker = self.registry.chunker(&chunker_entry.name)?;
        let embedder_entry = file.rag_config.embedder.selected_entry()?;
        let embedder = self.registry.embedder(&embedder_entry.name)?;
        chunker
            .chunk(
                chunker_entry,
                &mut docs,
                Some((embedder.as_ref(), embedder_entry)),
            )
            .await?;
        let chunk_count: usize = docs.iter().map(|d| d.chunks.len()).sum();
        self.send(
            reports,
            StatusReport::new(
                file_id,
                FileStatus::Chunking,
                format!("split into {chunk_count} chunks"),
                stage.elapsed().as_secs_f64(),
            ),
        )
        .await?;

        // Embed.
        let stage = Instant::now();
        for doc in &mut docs {
            let texts: Vec<String> = doc.chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = vectorize_checked(embedder.as_ref(), embedder_entry, &texts).await?;
            for (chunk, vector) in doc.chunks.iter_mut().zip(vectors) {
                chunk.vector = Some(vector);
            }
            doc.meta.embedder = embedder_entry.resolved_json();
        }
        self.send(
            reports,
            StatusReport::new(
                file_id,
                FileStatus::Embedding,
                format!("embedded {chunk_count} chunks"),
                stage.elapsed().as_secs_f64(),
            ),
        )
        .await?;

        // Persist, verifying stored chunk counts per document.
        let stage = Instant::now();
        let model = embedder_entry.str_field("Model")?;
        for doc in &docs {
            let doc_uuid = store::insert_document(self.store.as_ref(), doc).await?;
            inserted.push(doc_uuid.clone());
            store::batch_insert_chunks(self.store.as_ref(), model, doc, &doc_uuid).await?;
        }
        self.send(
            reports,
            StatusReport::new(
                file_id,
                FileStatus::Ingesting,
                format!("stored {} document(s), {chunk_count} chunks", docs.len()),
                stage.elapsed().as_secs_f64(),
            ),
        )
        .await?;

        self.send(
            reports,
            StatusReport::new(
                file_id,
                FileStatus::Done,
                format!("'{}' ingested", file.filename),
                total.elapsed().as_secs_f64(),
            ),
        )
        .await?;
        Ok(())
    }

    /// Oversized uploads split into continuation parts; each part
    /// title is subject to the same duplicate policy as the filename.
    async fn check_part_duplicates(&self, file: &FileConfig, docs: &[Document]) -> Result<()> {
        for doc in docs {
            if doc.title == file.filename {
                continue;
            }
            if let Some(existing) =
                store::exists_document_with_title(self.store.as_ref(), &doc.title).await?
            {
                if file.overwrite {
                    store::delete_document(self.store.as_ref(), &existing).await?;
                } else {
                    return Err(VerbaError::Duplicate(format!(
                        "a document named '{}' already exists",
                        doc.title
                    )));
                }
            }
        }
        Ok(())
    }
}
