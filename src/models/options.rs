//! # Conversion Options
//!
//! Parameters fixed for a task at creation time and forwarded unchanged to the
//! remote conversion service on every (re)submission.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output vector format produced by the remote conversion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "GeoJSON")]
    GeoJson,
    #[serde(rename = "MapInfo File")]
    MapInfo,
    #[default]
    #[serde(rename = "ESRI Shapefile")]
    EsriShapefile,
    #[serde(rename = "GPKG")]
    Gpkg,
}

impl OutputFormat {
    /// Driver name understood by the remote service
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeoJson => "GeoJSON",
            Self::MapInfo => "MapInfo File",
            Self::EsriShapefile => "ESRI Shapefile",
            Self::Gpkg => "GPKG",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GeoJSON" | "geojson" => Ok(Self::GeoJson),
            "MapInfo File" | "mapinfo" => Ok(Self::MapInfo),
            "ESRI Shapefile" | "shapefile" => Ok(Self::EsriShapefile),
            "GPKG" | "gpkg" => Ok(Self::Gpkg),
            _ => Err(format!("Unsupported output format: {s}")),
        }
    }
}

/// Immutable snapshot of conversion parameters stored with each task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub format: OutputFormat,
    /// Merge objects of the same type into one layer
    pub merge_objects: bool,
    /// Keep the source coordinate system instead of reprojecting
    pub save_default_crs: bool,
    pub skip_empty_geom: bool,
    pub remove_empty_attrs: bool,
    /// Also convert the register extract attached to the archive
    pub convert_additional_data: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            merge_objects: false,
            save_default_crs: true,
            skip_empty_geom: false,
            remove_empty_attrs: false,
            convert_additional_data: false,
        }
    }
}
