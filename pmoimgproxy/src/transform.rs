//! Choix et exécution de la transformation
//!
//! Le dispatcher décide entre passthrough, crop et scale à partir du
//! [`TransformSpec`], sonde les dimensions natives quand elles sont
//! nécessaires puis confie le travail au codec sur un thread bloquant.

use crate::backend::FetchResult;
use crate::codec::{Encoded, ImageCodec};
use crate::error::{ProxyError, Result};
use crate::params::{
    CropRect, Dimensions, Operation, ScaleTarget, TransformSpec, resolve_crop, resolve_scale,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use pmocache::ByteStream;
use std::sync::Arc;

/// Taille du premier essai de sonde, doublée à chaque échec
const INITIAL_PROBE_BYTES: usize = 4 * 1024;

/// Résultat du dispatch
#[derive(Debug)]
pub enum Dispatched {
    /// Source relayée telle quelle
    Passthrough(FetchResult),
    /// Image transformée, avec le validateur de la source
    Transformed {
        encoded: Encoded,
        validator: Option<String>,
        spec: TransformSpec,
    },
}

#[derive(Clone)]
pub struct TransformDispatcher {
    codec: Arc<dyn ImageCodec>,
    max_source_bytes: u64,
    max_output_pixels: u64,
}

impl TransformDispatcher {
    pub fn new(codec: Arc<dyn ImageCodec>, max_source_bytes: u64, max_output_pixels: u64) -> Self {
        Self {
            codec,
            max_source_bytes,
            max_output_pixels,
        }
    }

    /// Refuse une cible dont la surface dépasse `max_output_pixels`
    fn check_target(&self, target: &ScaleTarget) -> Result<()> {
        let pixels = target.width as u64 * target.height as u64;
        if pixels > self.max_output_pixels {
            return Err(ProxyError::Transform(format!(
                "target {}x{} exceeds the {} pixels output limit",
                target.width, target.height, self.max_output_pixels
            )));
        }
        Ok(())
    }

    pub async fn dispatch(
        &self,
        spec: Option<&TransformSpec>,
        source: FetchResult,
    ) -> Result<Dispatched> {
        let Some(spec) = spec.filter(|s| s.operation() != Operation::Passthrough) else {
            return Ok(Dispatched::Passthrough(source));
        };

        if let Some(size) = source.size.filter(|s| *s > self.max_source_bytes) {
            return Err(ProxyError::Transform(format!(
                "source of {} bytes exceeds the {} bytes transform limit",
                size, self.max_source_bytes
            )));
        }

        let FetchResult {
            stream, validator, ..
        } = source;

        let (dims, stream) = if spec.needs_probe() {
            let (dims, replay) = self.probe(stream).await?;
            tracing::debug!("Probed source: {}x{}", dims.width, dims.height);
            (Some(dims), replay)
        } else {
            (None, stream)
        };

        // La géométrie est validée avant de lire le reste de la source
        let job = if spec.is_crop() {
            Job::Crop(resolve_crop(spec, dims)?)
        } else {
            let target = resolve_scale(spec, dims)?;
            self.check_target(&target)?;
            Job::Scale(target)
        };

        let bytes = collect_bounded(stream, self.max_source_bytes).await?;
        let codec = self.codec.clone();
        let spec = *spec;

        let encoded = match job {
            Job::Crop(rect) => {
                tracing::debug!("Cropping to {:?}", rect);
                run_blocking(move || codec.crop(&bytes, rect)).await?
            }
            Job::Scale(target) => {
                tracing::debug!("Scaling to {:?}", target);
                run_blocking(move || codec.resize(&bytes, target)).await?
            }
        };

        Ok(Dispatched::Transformed {
            encoded,
            validator,
            spec,
        })
    }

    /// Lit un préfixe du flux jusqu'à ce que le codec en tire les dimensions
    ///
    /// Le flux retourné rejoue le préfixe lu avant le reste de la source.
    async fn probe(&self, mut stream: ByteStream) -> Result<(Dimensions, ByteStream)> {
        let mut buffer = BytesMut::new();
        let mut next_attempt = INITIAL_PROBE_BYTES;
        let mut exhausted = false;

        loop {
            while buffer.len() < next_attempt && !exhausted {
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                        if buffer.len() as u64 > self.max_source_bytes {
                            return Err(ProxyError::Transform(format!(
                                "no dimensions found within {} bytes",
                                self.max_source_bytes
                            )));
                        }
                    }
                    Some(Err(e)) => return Err(ProxyError::from_io("reading source", &e)),
                    None => exhausted = true,
                }
            }

            match self.codec.probe(&buffer) {
                Ok(dims) => {
                    let prefix = buffer.freeze();
                    let replay = futures::stream::once(async move { Ok(prefix) })
                        .chain(stream)
                        .boxed();
                    return Ok((dims, replay));
                }
                Err(e) if exhausted => return Err(e),
                Err(_) => next_attempt = buffer.len().max(next_attempt) * 2,
            }
        }
    }
}

enum Job {
    Crop(CropRect),
    Scale(ScaleTarget),
}

async fn collect_bounded(mut stream: ByteStream, limit: u64) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProxyError::from_io("reading source", &e))?;
        if (buffer.len() + chunk.len()) as u64 > limit {
            return Err(ProxyError::Transform(format!(
                "source exceeds the {} bytes transform limit",
                limit
            )));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

async fn run_blocking<F>(f: F) -> Result<Encoded>
where
    F: FnOnce() -> Result<Encoded> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProxyError::Transform(format!("codec task failed: {}", e)))?
}
