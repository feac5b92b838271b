use super::{remove_dataset, GeoJsonStore, VectorLayer, VectorStore};
use crate::error::{AlcdError, Result};
use crate::external::{CommandRunner, ToolCommand};
use std::path::Path;
use tracing::debug;

const OGR2OGR: &str = "ogr2ogr";

/// Vector store for on-disk datasets.
///
/// GeoJSON files are handled in-process. Any other extension (typically
/// `.shp`) is converted to and from a temporary GeoJSON file with `ogr2ogr`.
pub struct FileVectorStore<R> {
    runner: R,
    geojson: GeoJsonStore,
}

impl<R: CommandRunner> FileVectorStore<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            geojson: GeoJsonStore::new(),
        }
    }

    fn is_geojson(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("geojson") || e.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }

    fn driver_for(path: &Path) -> Result<&'static str> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "shp" => Ok("ESRI Shapefile"),
            "gpkg" => Ok("GPKG"),
            "sqlite" => Ok("SQLite"),
            _ => Err(AlcdError::vector(
                path,
                format!("unsupported vector format `.{}`", ext),
            )),
        }
    }
}

impl<R: CommandRunner> VectorStore for FileVectorStore<R> {
    fn read(&self, path: &Path) -> Result<VectorLayer> {
        if Self::is_geojson(path) {
            return self.geojson.read(path);
        }
        if !path.exists() {
            return Err(AlcdError::vector(path, "layer does not exist"));
        }

        let scratch = tempfile::tempdir()?;
        let converted = scratch.path().join("layer.geojson");
        let cmd = ToolCommand::new(OGR2OGR)
            .flag("-f", "GeoJSON")
            .arg_path(&converted)
            .arg_path(path);
        self.runner.run(&cmd)?;
        debug!(path = %path.display(), "Converted layer to GeoJSON");

        self.geojson.read(&converted)
    }

    fn write(&self, path: &Path, layer: &VectorLayer) -> Result<()> {
        if Self::is_geojson(path) {
            return self.geojson.write(path, layer);
        }
        let driver = Self::driver_for(path)?;

        let scratch = tempfile::tempdir()?;
        let staged = scratch.path().join("layer.geojson");
        self.geojson.write(&staged, layer)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        remove_dataset(path)?;

        let cmd = ToolCommand::new(OGR2OGR)
            .flag("-f", driver)
            .flag("-nlt", layer.geometry_type.ogr_name())
            .flag("-a_srs", layer.srs.name())
            .arg_path(path)
            .arg_path(&staged);
        self.runner.run(&cmd)?;
        debug!(path = %path.display(), features = layer.len(), "Wrote layer through ogr2ogr");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::testing::RecordingRunner;
    use crate::vector::{GeometryType, SpatialRef};
    use tempfile::TempDir;

    #[test]
    fn test_geojson_bypasses_ogr() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let store = FileVectorStore::new(runner.clone());
        let path = dir.path().join("merged.geojson");
        let layer = VectorLayer::new(
            SpatialRef::new("EPSG:32631"),
            GeometryType::Point,
            vec!["class".to_string()],
        );

        store.write(&path, &layer).unwrap();
        assert_eq!(store.read(&path).unwrap(), layer);
        assert!(runner.commands.borrow().is_empty());
    }

    #[test]
    fn test_shapefile_write_uses_ogr2ogr() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let store = FileVectorStore::new(runner.clone());
        let path = dir.path().join("train_points.shp");
        let layer = VectorLayer::new(
            SpatialRef::new("EPSG:32631"),
            GeometryType::Polygon,
            vec!["class".to_string()],
        );

        store.write(&path, &layer).unwrap();

        let commands = runner.commands.borrow();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].program, "ogr2ogr");
        assert_eq!(&commands[0].args[..6], ["-f", "ESRI Shapefile", "-nlt", "POLYGON", "-a_srs", "EPSG:32631"]);
        assert_eq!(commands[0].args[6], path.display().to_string());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileVectorStore::new(RecordingRunner::new());
        let layer = VectorLayer::new(SpatialRef::wgs84(), GeometryType::Point, vec![]);
        let result = store.write(&dir.path().join("layer.kml"), &layer);
        assert!(matches!(result, Err(AlcdError::Vector { .. })));
    }
}
