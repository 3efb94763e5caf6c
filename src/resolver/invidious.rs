use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ContentResolver;
use crate::model::{StreamLocator, TrackMetadata};

/// Validez real de un locator de stream de YouTube (6 horas).
const STREAM_VALIDITY_SECS: i64 = 6 * 60 * 60;

/// Cliente para Invidious API (alternativa a YouTube API)
pub struct InvidiousResolver {
    client: reqwest::Client,
    instances: Vec<String>,
    current_instance: AtomicUsize,
}

#[derive(Debug, Deserialize)]
struct InvidiousVideo {
    #[serde(rename = "videoId")]
    video_id: String,
    title: String,
    #[serde(rename = "lengthSeconds")]
    length_seconds: Option<u64>,
    author: Option<String>,
    #[serde(rename = "videoThumbnails")]
    video_thumbnails: Option<Vec<Thumbnail>>,
    #[serde(rename = "adaptiveFormats")]
    adaptive_formats: Option<Vec<AdaptiveFormat>>,
    #[serde(rename = "formatStreams")]
    format_streams: Option<Vec<FormatStream>>,
    #[serde(rename = "recommendedVideos")]
    recommended_videos: Option<Vec<RecommendedVideo>>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    width: u32,
}

#[derive(Debug, Deserialize)]
struct AdaptiveFormat {
    url: String,
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct FormatStream {
    url: String,
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct RecommendedVideo {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct InvidiousSearchResult {
    #[serde(rename = "videoId")]
    video_id: String,
    title: String,
    #[serde(rename = "lengthSeconds")]
    length_seconds: Option<u64>,
    author: Option<String>,
    #[serde(rename = "videoThumbnails")]
    video_thumbnails: Option<Vec<Thumbnail>>,
}

impl InvidiousResolver {
    pub fn new() -> Self {
        // Lista de instancias públicas de Invidious
        let instances = vec![
            "https://yewtu.be".to_string(),
            "https://inv.nadeko.net".to_string(),
            "https://invidious.nerdvpn.de".to_string(),
            "https://invidious.protokolla.fi".to_string(),
            "https://invidious.privacydev.net".to_string(),
            "https://vid.puffyan.us".to_string(),
        ];

        Self::with_instances(instances)
    }

    pub fn with_instances(instances: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            instances,
            current_instance: AtomicUsize::new(0),
        }
    }

    /// Obtiene la siguiente instancia de Invidious
    fn get_next_instance(&self) -> String {
        let current = self.current_instance.fetch_add(1, Ordering::SeqCst);
        let index = current % self.instances.len();
        self.instances[index].clone()
    }

    /// Obtiene información de un video rotando instancias
    async fn get_video_info(&self, video_id: &str) -> Result<InvidiousVideo> {
        for _attempt in 0..3 {
            let instance = self.get_next_instance();
            let url = format!("{}/api/v1/videos/{}", instance, video_id);

            match self.try_get_video_info(&url).await {
                Ok(video) => {
                    debug!("✅ Información obtenida de {}", instance);
                    return Ok(video);
                }
                Err(e) => {
                    warn!("❌ Falló obtener info en {}: {}", instance, e);
                    continue;
                }
            }
        }

        anyhow::bail!("Falló obtener información de {} en todas las instancias", video_id)
    }

    async fn try_get_video_info(&self, url: &str) -> Result<InvidiousVideo> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Error en request a Invidious")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        let video: InvidiousVideo = response
            .json()
            .await
            .context("Error parseando información del video")?;

        Ok(video)
    }

    async fn try_search(&self, url: &str, query: &str) -> Result<Vec<InvidiousSearchResult>> {
        let response = self
            .client
            .get(url)
            .query(&[
                ("q", query),
                ("type", "video"),
                ("sort_by", "relevance"),
                ("page", "1"),
            ])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Error en request a Invidious")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response
            .json()
            .await
            .context("Error parseando respuesta JSON")
    }

    fn pick_thumbnail(thumbnails: Option<Vec<Thumbnail>>) -> Option<String> {
        let thumbnails = thumbnails?;
        thumbnails
            .into_iter()
            .find(|t| t.width >= 320)
            .map(|t| t.url)
    }
}

impl Default for InvidiousResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentResolver for InvidiousResolver {
    async fn fetch_metadata(&self, id: &str) -> Result<TrackMetadata> {
        let video = self.get_video_info(id).await?;

        Ok(TrackMetadata {
            id: video.video_id,
            title: video.title,
            artist: video.author,
            duration_secs: video.length_seconds,
            thumbnail: Self::pick_thumbnail(video.video_thumbnails),
        })
    }

    async fn fetch_stream_locator(&self, id: &str) -> Result<StreamLocator> {
        let video = self.get_video_info(id).await?;
        let expires_at = Utc::now() + ChronoDuration::seconds(STREAM_VALIDITY_SECS);

        // Preferir formato adaptativo de solo audio
        if let Some(adaptive_formats) = video.adaptive_formats {
            for format in adaptive_formats {
                if format.format_type.contains("audio") && format.format_type.contains("mp4") {
                    debug!("✅ Encontrado formato de audio: {}", format.format_type);
                    return Ok(StreamLocator {
                        url: format.url,
                        mime_type: format.format_type,
                        expires_at,
                    });
                }
            }
        }

        // Fallback a format streams
        if let Some(format_streams) = video.format_streams {
            for format in format_streams {
                if format.format_type.contains("audio") {
                    debug!("✅ Formato de audio fallback: {}", format.format_type);
                    return Ok(StreamLocator {
                        url: format.url,
                        mime_type: format.format_type,
                        expires_at,
                    });
                }
            }
        }

        anyhow::bail!("No se encontró formato de audio válido para {}", id)
    }

    async fn fetch_related_ids(&self, id: &str) -> Result<Vec<String>> {
        let video = self.get_video_info(id).await?;

        let ids: Vec<String> = video
            .recommended_videos
            .unwrap_or_default()
            .into_iter()
            .map(|rec| rec.video_id)
            .collect();

        debug!("{} ids relacionados para {}", ids.len(), id);
        Ok(ids)
    }

    async fn search_raw(&self, query: &str) -> Result<Vec<TrackMetadata>> {
        info!("🔍 Buscando en Invidious: {}", query);

        let mut last_error = String::new();

        for instance in &self.instances {
            let url = format!("{}/api/v1/search", instance);

            match self.try_search(&url, query).await {
                Ok(results) if !results.is_empty() => {
                    info!("✅ Búsqueda exitosa en {}: {} resultados", instance, results.len());
                    return Ok(results
                        .into_iter()
                        .map(|result| TrackMetadata {
                            id: result.video_id,
                            title: result.title,
                            artist: result.author,
                            duration_secs: result.length_seconds,
                            thumbnail: Self::pick_thumbnail(result.video_thumbnails),
                        })
                        .collect());
                }
                Ok(_) => {
                    warn!("⚠️ {} devolvió 0 resultados", instance);
                    last_error = format!("No results from {}", instance);
                }
                Err(e) => {
                    warn!("❌ Falló búsqueda en {}: {}", instance, e);
                    last_error = format!("{}: {}", instance, e);
                    continue;
                }
            }
        }

        anyhow::bail!(
            "Falló búsqueda en todas las instancias de Invidious. Último error: {}",
            last_error
        )
    }
}
