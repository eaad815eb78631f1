//! Paramètres de transformation et géométrie
//!
//! [`TransformSpec`] est construit à partir de la query string de la requête
//! (`w`, `h`, `x`, `y`, `r`). Les fonctions [`resolve_crop`] et
//! [`resolve_scale`] traduisent ces paramètres en pixels, éventuellement à
//! partir des dimensions natives de la source.

use crate::error::{ProxyError, Result};

/// Paramètres de transformation validés
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformSpec {
    pub w: Option<f64>,
    pub h: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Valeurs exprimées en pourcentage des dimensions de la source
    pub relative: bool,
}

/// Opération décidée pour une requête
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Passthrough,
    Crop,
    Scale,
}

/// Dimensions d'une image en pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rectangle de découpe en pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Politique de redimensionnement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// Remplit exactement la cible, le ratio peut être déformé
    Exact,
    /// Tient dans la cible en conservant le ratio
    Within,
}

/// Cible d'un redimensionnement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleTarget {
    pub width: u32,
    pub height: u32,
    pub fit: FitMode,
}

impl TransformSpec {
    /// Construit la spécification depuis une query string
    ///
    /// Retourne `Ok(None)` quand aucun paramètre reconnu n'est présent.
    /// Les paramètres inconnus sont ignorés ; une valeur non numérique,
    /// négative ou non finie est rejetée en [`ProxyError::Setup`].
    ///
    /// # Exemple
    ///
    /// ```
    /// use pmoimgproxy::TransformSpec;
    ///
    /// let spec = TransformSpec::from_query(Some("w=100&h=50&utm=x")).unwrap().unwrap();
    /// assert_eq!(spec.w, Some(100.0));
    /// assert!(TransformSpec::from_query(Some("utm=x")).unwrap().is_none());
    /// ```
    pub fn from_query(query: Option<&str>) -> Result<Option<Self>> {
        let Some(query) = query.filter(|q| !q.is_empty()) else {
            return Ok(None);
        };

        let mut spec = TransformSpec::default();
        let mut recognized = false;

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "w" => spec.w = Some(parse_extent("w", &value)?),
                "h" => spec.h = Some(parse_extent("h", &value)?),
                "x" => spec.x = Some(parse_offset("x", &value)?),
                "y" => spec.y = Some(parse_offset("y", &value)?),
                "r" => spec.relative = parse_flag(&value)?,
                _ => continue,
            }
            recognized = true;
        }

        Ok(recognized.then_some(spec))
    }

    pub fn is_crop(&self) -> bool {
        (self.x.is_some() || self.y.is_some()) && (self.w.is_some() || self.h.is_some())
    }

    pub fn is_scale(&self) -> bool {
        !self.is_crop() && (self.w.is_some() || self.h.is_some())
    }

    pub fn operation(&self) -> Operation {
        if self.is_crop() {
            Operation::Crop
        } else if self.is_scale() {
            Operation::Scale
        } else {
            Operation::Passthrough
        }
    }

    /// Indique si les dimensions natives de la source sont nécessaires
    pub fn needs_probe(&self) -> bool {
        match self.operation() {
            Operation::Passthrough => false,
            Operation::Crop => self.relative || self.w.is_none() || self.h.is_none(),
            Operation::Scale => self.relative || self.w.is_none() || self.h.is_none(),
        }
    }

    /// Empreinte des paramètres présents, ajoutée au validateur de la source
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        for (name, value) in [("w", self.w), ("h", self.h), ("x", self.x), ("y", self.y)] {
            if let Some(v) = value {
                out.push_str(name);
                out.push_str(&v.to_string());
            }
        }
        if self.relative {
            out.push('r');
        }
        out
    }
}

fn parse_number(name: &str, value: &str) -> Result<f64> {
    let n: f64 = value
        .trim()
        .parse()
        .map_err(|_| ProxyError::Setup(format!("parameter '{}' is not a number: {:?}", name, value)))?;
    if !n.is_finite() || n < 0.0 {
        return Err(ProxyError::Setup(format!(
            "parameter '{}' must be a finite non-negative number, got {}",
            name, value
        )));
    }
    Ok(n)
}

fn parse_offset(name: &str, value: &str) -> Result<f64> {
    parse_number(name, value)
}

fn parse_extent(name: &str, value: &str) -> Result<f64> {
    let n = parse_number(name, value)?;
    if n == 0.0 {
        return Err(ProxyError::Setup(format!("parameter '{}' must be positive", name)));
    }
    Ok(n)
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ProxyError::Setup(format!("parameter 'r' is not a boolean: {:?}", other))),
    }
}

/// Convertit une valeur en pixels, relative ou absolue
fn to_pixels(value: f64, relative: bool, native: u32) -> u32 {
    let px = if relative {
        (value * native as f64 / 100.0).round()
    } else {
        value.round()
    };
    px.clamp(0.0, u32::MAX as f64) as u32
}

fn require_dims(dims: Option<Dimensions>, what: &str) -> Result<Dimensions> {
    dims.ok_or_else(|| ProxyError::Transform(format!("source dimensions required for {}", what)))
}

/// Calcule le rectangle de découpe
///
/// Un `w`/`h` absent s'étend jusqu'au bord de l'image, un `x`/`y` absent
/// vaut 0. Quand les dimensions sont connues, le rectangle est borné à
/// l'image ; une origine hors de l'image est une erreur de transformation.
pub fn resolve_crop(spec: &TransformSpec, dims: Option<Dimensions>) -> Result<CropRect> {
    let dims = if spec.needs_probe() {
        Some(require_dims(dims, "crop")?)
    } else {
        dims
    };
    let (native_w, native_h) = dims.map(|d| (d.width, d.height)).unwrap_or((0, 0));

    let x = spec.x.map(|v| to_pixels(v, spec.relative, native_w)).unwrap_or(0);
    let y = spec.y.map(|v| to_pixels(v, spec.relative, native_h)).unwrap_or(0);

    let Some(dims) = dims else {
        // Absolu avec w et h : rectangle littéral, borné par le codec
        return Ok(CropRect {
            x,
            y,
            width: spec.w.map(|v| to_pixels(v, false, 0)).unwrap_or(0).max(1),
            height: spec.h.map(|v| to_pixels(v, false, 0)).unwrap_or(0).max(1),
        });
    };

    if x >= dims.width || y >= dims.height {
        return Err(ProxyError::Transform(format!(
            "crop origin ({}, {}) outside of {}x{} image",
            x, y, dims.width, dims.height
        )));
    }

    let width = spec
        .w
        .map(|v| to_pixels(v, spec.relative, dims.width))
        .unwrap_or(dims.width - x);
    let height = spec
        .h
        .map(|v| to_pixels(v, spec.relative, dims.height))
        .unwrap_or(dims.height - y);

    Ok(CropRect {
        x,
        y,
        width: width.clamp(1, dims.width - x),
        height: height.clamp(1, dims.height - y),
    })
}

/// Calcule la cible d'un redimensionnement
///
/// - absolu, `w` et `h` : remplissage exact
/// - absolu, une seule dimension : ratio conservé, sans agrandissement
/// - relatif : chaque axe selon son pourcentage ; une seule dimension
///   s'applique aux deux axes
pub fn resolve_scale(spec: &TransformSpec, dims: Option<Dimensions>) -> Result<ScaleTarget> {
    if !spec.relative {
        if let (Some(w), Some(h)) = (spec.w, spec.h) {
            return Ok(ScaleTarget {
                width: to_pixels(w, false, 0).max(1),
                height: to_pixels(h, false, 0).max(1),
                fit: FitMode::Exact,
            });
        }

        let dims = require_dims(dims, "single-dimension scale")?;
        let (width, height) = match (spec.w, spec.h) {
            (Some(w), None) => (to_pixels(w, false, 0).min(dims.width), dims.height),
            (None, Some(h)) => (dims.width, to_pixels(h, false, 0).min(dims.height)),
            _ => return Err(ProxyError::Transform("scale requires w or h".to_string())),
        };
        return Ok(ScaleTarget {
            width: width.max(1),
            height: height.max(1),
            fit: FitMode::Within,
        });
    }

    let dims = require_dims(dims, "relative scale")?;
    let (pw, ph) = match (spec.w, spec.h) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, w),
        (None, Some(h)) => (h, h),
        (None, None) => return Err(ProxyError::Transform("scale requires w or h".to_string())),
    };

    Ok(ScaleTarget {
        width: to_pixels(pw, true, dims.width).max(1),
        height: to_pixels(ph, true, dims.height).max(1),
        fit: FitMode::Exact,
    })
}
