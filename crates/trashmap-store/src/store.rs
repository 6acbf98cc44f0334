use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use trashmap_core::{validate_detection_id, Detection, Insight};

use crate::files::{io_error, load_json_or_quarantine, remove_file_if_present, write_json_atomic};
use crate::{StoreConfig, StoreError};

const DETECTIONS_FILE: &str = "detections.json";
const INSIGHTS_FILE: &str = "insights.json";
const IMAGES_DIR: &str = "images";
const IMAGE_EXTENSION: &str = ".jpeg";

#[derive(Default)]
struct StoreState {
    /// Insertion order; the front is evicted first.
    detections: Vec<Detection>,
    insights: Vec<Insight>,
}

/// JSON-file backed store for detections, insights and frame images.
///
/// All mutations hold the write lock across the in-memory change, the file
/// rewrite and any image removal, so readers only ever see records that
/// reached disk and a stored record never loses its image to an older call.
pub struct ResultStore {
    config: StoreConfig,
    detections_path: PathBuf,
    insights_path: PathBuf,
    images_dir: PathBuf,
    state: RwLock<StoreState>,
}

impl ResultStore {
    /// Opens (or initialises) a store under `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directories cannot be created or a
    /// data file cannot be read.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let images_dir = config.data_dir.join(IMAGES_DIR);
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(io_error(&images_dir))?;

        let detections_path = config.data_dir.join(DETECTIONS_FILE);
        let insights_path = config.data_dir.join(INSIGHTS_FILE);

        let detections: Vec<Detection> = load_json_or_quarantine(&detections_path).await?;
        let insights: Vec<Insight> = load_json_or_quarantine(&insights_path).await?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            detections = detections.len(),
            insights = insights.len(),
            "store: opened"
        );

        Ok(Self {
            config,
            detections_path,
            insights_path,
            images_dir,
            state: RwLock::new(StoreState {
                detections,
                insights,
            }),
        })
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Confirms the image directory is still present and is a directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory is missing or unreadable.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let meta = tokio::fs::metadata(&self.images_dir)
            .await
            .map_err(io_error(&self.images_dir))?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Io {
                path: self.images_dir.display().to_string(),
                source: std::io::Error::other("not a directory"),
            })
        }
    }

    /// Persists a classified detection together with its frame.
    ///
    /// The image is written first, then the record is appended and the JSON
    /// file rewritten. If the rewrite fails the append is undone and the image
    /// removed, leaving no trace of the failed insert. When the retention cap
    /// is exceeded the oldest records and their images are dropped.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Duplicate`] if the id is already stored.
    /// - [`StoreError::Io`] / [`StoreError::Json`] if writing fails.
    pub async fn insert_detection(
        &self,
        detection: Detection,
        image: &[u8],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        if state
            .detections
            .iter()
            .any(|d| d.detection_id == detection.detection_id)
        {
            return Err(StoreError::Duplicate(detection.detection_id));
        }

        let image_path = self.images_dir.join(detection.image_file_name());
        tokio::fs::write(&image_path, image)
            .await
            .map_err(io_error(&image_path))?;

        let detection_id = detection.detection_id.clone();
        state.detections.push(detection);
        let evicted = evict_oldest(&mut state.detections, self.config.max_detections);

        if let Err(e) = write_json_atomic(&self.detections_path, &state.detections).await {
            state.detections.pop();
            restore_front(&mut state.detections, evicted);
            if let Err(cleanup) = remove_file_if_present(&image_path).await {
                tracing::warn!(error = %cleanup, "store: failed to remove orphaned image");
            }
            return Err(e);
        }
        // Evicted ids may be re-inserted as soon as the lock is released, so
        // their images go first.
        if !evicted.is_empty() {
            tracing::info!(
                evicted = evicted.len(),
                "store: retention limit reached; dropped oldest detections"
            );
            self.remove_images(&evicted).await;
        }
        drop(state);

        tracing::debug!(detection_id = %detection_id, "store: detection persisted");
        Ok(())
    }

    /// Detections ordered newest first by capture timestamp.
    pub async fn list_detections(&self, limit: Option<usize>) -> Vec<Detection> {
        let state = self.state.read().await;
        let mut out = state.detections.clone();
        drop(state);

        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    /// Every retained detection, in insertion order.
    pub async fn all_detections(&self) -> Vec<Detection> {
        self.state.read().await.detections.clone()
    }

    pub async fn detection_count(&self) -> usize {
        self.state.read().await.detections.len()
    }

    pub async fn get_detection(&self, detection_id: &str) -> Option<Detection> {
        self.state
            .read()
            .await
            .detections
            .iter()
            .find(|d| d.detection_id == detection_id)
            .cloned()
    }

    /// Removes every detection and its image. Insights are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] / [`StoreError::Json`] if the file rewrite
    /// fails; the in-memory set is restored in that case.
    pub async fn clear_detections(&self) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let removed = std::mem::take(&mut state.detections);

        if let Err(e) = write_json_atomic(&self.detections_path, &state.detections).await {
            state.detections = removed;
            return Err(e);
        }
        self.remove_images(&removed).await;
        drop(state);

        tracing::info!(cleared = removed.len(), "store: detections cleared");
        Ok(removed.len())
    }

    /// Appends an insight, evicting the oldest beyond the retention cap.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] / [`StoreError::Json`] if the file rewrite
    /// fails; the append is undone in that case.
    pub async fn insert_insight(&self, insight: Insight) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.insights.push(insight);
        let evicted = evict_oldest(&mut state.insights, self.config.max_insights);

        if let Err(e) = write_json_atomic(&self.insights_path, &state.insights).await {
            state.insights.pop();
            restore_front(&mut state.insights, evicted);
            return Err(e);
        }
        Ok(())
    }

    pub async fn latest_insight(&self) -> Option<Insight> {
        self.state.read().await.insights.last().cloned()
    }

    /// Insights newest first.
    pub async fn list_insights(&self, limit: Option<usize>) -> Vec<Insight> {
        let state = self.state.read().await;
        let take = limit.unwrap_or(state.insights.len());
        state.insights.iter().rev().take(take).cloned().collect()
    }

    /// Reads a stored frame by file name (`<detection_id>.jpeg`).
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidImageName`] for names that are not a valid
    ///   detection id plus `.jpeg`; this also rules out path traversal.
    /// - [`StoreError::NotFound`] if no such image exists.
    /// - [`StoreError::Io`] on other read failures.
    pub async fn read_image(&self, file_name: &str) -> Result<Vec<u8>, StoreError> {
        let valid = file_name
            .strip_suffix(IMAGE_EXTENSION)
            .is_some_and(|stem| validate_detection_id(stem).is_ok());
        if !valid {
            return Err(StoreError::InvalidImageName(file_name.to_string()));
        }

        let path = self.images_dir.join(file_name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    async fn remove_images(&self, detections: &[Detection]) {
        for detection in detections {
            let path = self.images_dir.join(detection.image_file_name());
            if let Err(e) = remove_file_if_present(&path).await {
                tracing::warn!(
                    detection_id = %detection.detection_id,
                    error = %e,
                    "store: failed to remove image"
                );
            }
        }
    }
}

/// Drains the oldest entries so at most `cap` remain; `cap == 0` is unbounded.
fn evict_oldest<T>(items: &mut Vec<T>, cap: usize) -> Vec<T> {
    if cap == 0 || items.len() <= cap {
        return Vec::new();
    }
    let excess = items.len() - cap;
    items.drain(..excess).collect()
}

fn restore_front<T>(items: &mut Vec<T>, mut front: Vec<T>) {
    front.append(items);
    *items = front;
}
