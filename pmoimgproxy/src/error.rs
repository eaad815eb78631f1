//! Taxonomie des erreurs du proxy
//!
//! Chaque étape du pipeline convertit ses échecs dans l'une des quatre
//! catégories ci-dessous ; la catégorie décide seule du statut HTTP.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type Result personnalisé pour pmoimgproxy
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Erreurs possibles lors du traitement d'une requête
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Source absente (fichier manquant, 404/410 distant)
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Échec du codec (probe, crop, resize, encodage)
    #[error("Transform failed: {0}")]
    Transform(String),

    /// Échec du backend autre qu'une absence
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Échec de résolution ou paramètres invalides, avant toute lecture
    #[error("Invalid request: {0}")]
    Setup(String),
}

impl ProxyError {
    /// Statut HTTP associé à la catégorie
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::Setup(_) => StatusCode::NOT_FOUND,
            Self::Transform(_) | Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Code stable exposé dans le corps des réponses d'erreur
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Transform(_) => "TRANSFORM_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Setup(_) => "SETUP_ERROR",
        }
    }

    /// Vrai si la requête doit être laissée au handler suivant
    pub fn is_defer(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classe une erreur d'E/S survenue en lisant une source
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(format!("{}: {}", context, err))
        } else {
            Self::Upstream(format!("{}: {}", context, err))
        }
    }
}

/// Marqueur posé dans les extensions d'une réponse 404 de renvoi
///
/// Le router du proxy capture tout le point de montage : un middleware de
/// l'hôte peut tester ce marqueur pour enchaîner sur son propre fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deferred;

/// Réponse d'erreur générique
///
/// Le détail de l'erreur ne part jamais vers le client : il est journalisé.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Code d'erreur
    pub error: String,
    /// Message descriptif
    pub message: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();

        if self.is_defer() {
            tracing::debug!("Deferring request: {}", self);
            let mut response = status.into_response();
            response.extensions_mut().insert(Deferred);
            return response;
        }

        match &self {
            Self::Setup(_) => tracing::debug!("{}", self),
            _ => tracing::error!("{}", self),
        }

        let message = match self {
            Self::Setup(_) => "The request could not be resolved",
            _ => "The image could not be delivered",
        };

        (
            status,
            Json(ErrorResponse {
                error: self.code().to_string(),
                message: message.to_string(),
            }),
        )
            .into_response()
    }
}
