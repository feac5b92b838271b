//! Raster processing collaborator
//!
//! The pipeline names each raster operation with a [`RasterOp`] value;
//! [`OtbRasterEngine`] turns it into Orfeo Toolbox / GDAL command lines.

use super::{CommandRunner, ToolCommand};
use crate::error::{AlcdError, Result};
use crate::vector::SpatialRef;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Pixel sampling strategy for `otbcli_SampleSelection`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// As many samples per class as the smallest class has
    Smallest,
    /// Constant count equal to the smallest class population
    ConstantMin,
    /// Constant count per class
    Constant(u64),
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Smallest
    }
}

impl fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smallest => write!(f, "smallest"),
            Self::ConstantMin => write!(f, "constant"),
            Self::Constant(n) => write!(f, "constant_{}", n),
        }
    }
}

impl std::str::FromStr for SamplingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "smallest" => Ok(Self::Smallest),
            "constant" => Ok(Self::ConstantMin),
            other => other
                .strip_prefix("constant_")
                .and_then(|n| n.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .map(Self::Constant)
                .ok_or_else(|| {
                    format!(
                        "Unknown sampling strategy: {}. Valid: smallest, constant, constant_<N>",
                        s
                    )
                }),
        }
    }
}

/// Raster operations used by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum RasterOp {
    /// Build the multi-band feature image and its no-data mask
    ComposeFeatures {
        global_parameters: PathBuf,
        paths_parameters: PathBuf,
        no_data_mask: PathBuf,
    },
    /// Raster to polygons, value stored in `class`
    Polygonize,
    /// Simplify polygons with a distance tolerance
    Simplify { tolerance: f64 },
    /// Burn vector polygons onto the grid of `reference`
    Rasterize { reference: PathBuf },
    /// Per-band mean and standard deviation
    ImageStatistics,
    /// Pixel counts per class inside the training polygons
    ClassStatistics { mask: PathBuf },
    SampleSelection {
        mask: PathBuf,
        class_statistics: PathBuf,
        rates: PathBuf,
        strategy: SamplingStrategy,
    },
    /// Pixel values at the selected positions, fields `band_<i>`
    SampleExtraction,
    /// Median filter over the confidence map
    ConfidenceEnhance { radius: u32 },
    /// Majority-vote regularization of the label map
    Regularize { radius: u32 },
    ConfusionMatrix { reference: PathBuf },
    ColorMapping { lut: PathBuf },
    /// Class boundaries dilated by `dilatation_radius`
    Contours { dilatation_radius: u32 },
    /// Boundaries drawn over an RGB quicklook of the scene
    ContourOverlay { contours: PathBuf },
}

impl RasterOp {
    pub fn name(&self) -> &'static str {
        match self {
            RasterOp::ComposeFeatures { .. } => "compose_features",
            RasterOp::Polygonize => "polygonize",
            RasterOp::Simplify { .. } => "simplify",
            RasterOp::Rasterize { .. } => "rasterize",
            RasterOp::ImageStatistics => "image_statistics",
            RasterOp::ClassStatistics { .. } => "class_statistics",
            RasterOp::SampleSelection { .. } => "sample_selection",
            RasterOp::SampleExtraction => "sample_extraction",
            RasterOp::ConfidenceEnhance { .. } => "confidence_enhance",
            RasterOp::Regularize { .. } => "regularize",
            RasterOp::ConfusionMatrix { .. } => "confusion_matrix",
            RasterOp::ColorMapping { .. } => "color_mapping",
            RasterOp::Contours { .. } => "contours",
            RasterOp::ContourOverlay { .. } => "contour_overlay",
        }
    }
}

/// One raster operation over file paths
#[derive(Debug, Clone, PartialEq)]
pub struct RasterJob {
    pub op: RasterOp,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

impl RasterJob {
    pub fn new(op: RasterOp, inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            op,
            inputs,
            output: output.into(),
        }
    }

    fn input(&self, index: usize) -> Result<&Path> {
        self.inputs.get(index).map(PathBuf::as_path).ok_or_else(|| {
            AlcdError::config(format!(
                "{} needs at least {} input(s), got {}",
                self.op.name(),
                index + 1,
                self.inputs.len()
            ))
        })
    }
}

/// Raster feature engine collaborator
pub trait RasterEngine {
    /// Produce `job.output` from `job.inputs`
    fn run(&self, job: &RasterJob) -> Result<()>;

    /// Spatial reference of a raster
    fn spatial_ref(&self, raster: &Path) -> Result<SpatialRef>;
}

/// Helper programs for operations without a single OTB application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperTools {
    /// Feature image composer, called as `<composer> <global.json> <paths.json> <out> <no_data>`
    pub composer: String,
    /// Post-processing helper, called as `<helper> <confidence|contours|overlay> ...`
    pub helper: String,
}

impl Default for HelperTools {
    fn default() -> Self {
        Self {
            composer: "alcd-compose".to_string(),
            helper: "alcd-postprocess".to_string(),
        }
    }
}

/// Orfeo Toolbox + GDAL implementation of [`RasterEngine`]
pub struct OtbRasterEngine<R> {
    runner: R,
    tools: HelperTools,
}

impl<R: CommandRunner> OtbRasterEngine<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            tools: HelperTools::default(),
        }
    }

    pub fn with_tools(mut self, tools: HelperTools) -> Self {
        self.tools = tools;
        self
    }

    /// Command line for a job
    pub fn command(&self, job: &RasterJob) -> Result<ToolCommand> {
        let out = job.output.as_path();
        let cmd = match &job.op {
            RasterOp::ComposeFeatures {
                global_parameters,
                paths_parameters,
                no_data_mask,
            } => ToolCommand::new(&self.tools.composer)
                .arg_path(global_parameters)
                .arg_path(paths_parameters)
                .arg_path(out)
                .arg_path(no_data_mask),
            RasterOp::Polygonize => {
                let input = job.input(0)?;
                ToolCommand::new("gdal_polygonize.py")
                    .arg_path(input)
                    .flag_path("-mask", input)
                    .flag("-f", ogr_driver(out))
                    .arg_path(out)
                    .arg("no_data")
                    .arg("class")
            }
            RasterOp::Simplify { tolerance } => ToolCommand::new("ogr2ogr")
                .flag("-f", ogr_driver(out))
                .arg_path(out)
                .arg_path(job.input(0)?)
                .flag("-simplify", tolerance.to_string()),
            RasterOp::Rasterize { reference } => ToolCommand::new("otbcli_Rasterization")
                .flag_path("-in", job.input(0)?)
                .flag_path("-im", reference)
                .flag_path("-out", out)
                .arg("uint8")
                .flag("-background", "1")
                .flag("-mode", "binary")
                .flag("-mode.binary.foreground", "0"),
            RasterOp::ImageStatistics => ToolCommand::new("otbcli_ComputeImagesStatistics")
                .flag_path("-il", job.input(0)?)
                .flag_path("-out", out),
            RasterOp::ClassStatistics { mask } => ToolCommand::new("otbcli_PolygonClassStatistics")
                .flag_path("-in", job.input(0)?)
                .flag_path("-vec", job.input(1)?)
                .flag_path("-mask", mask)
                .flag("-field", "class")
                .flag_path("-out", out),
            RasterOp::SampleSelection {
                mask,
                class_statistics,
                rates,
                strategy,
            } => {
                let base = ToolCommand::new("otbcli_SampleSelection")
                    .flag_path("-in", job.input(0)?)
                    .flag_path("-vec", job.input(1)?)
                    .flag_path("-mask", mask)
                    .flag_path("-instats", class_statistics)
                    .flag("-field", "class")
                    .flag("-sampler", "random")
                    .flag_path("-outrates", rates)
                    .flag_path("-out", out);
                match strategy {
                    SamplingStrategy::Smallest => base.flag("-strategy", "smallest"),
                    SamplingStrategy::ConstantMin => {
                        let xml = std::fs::read_to_string(class_statistics)?;
                        let min = samples_per_class(&xml)?
                            .into_iter()
                            .min()
                            .ok_or_else(|| {
                                AlcdError::config("class statistics list no classes")
                            })?;
                        base.flag("-strategy", "constant")
                            .flag("-strategy.constant.nb", min.to_string())
                    }
                    SamplingStrategy::Constant(n) => base
                        .flag("-strategy", "constant")
                        .flag("-strategy.constant.nb", n.to_string()),
                }
            }
            RasterOp::SampleExtraction => ToolCommand::new("otbcli_SampleExtraction")
                .flag_path("-in", job.input(0)?)
                .flag_path("-vec", job.input(1)?)
                .flag("-outfield", "prefix")
                .flag("-outfield.prefix.name", "band_")
                .flag("-field", "class")
                .flag_path("-out", out),
            RasterOp::ConfidenceEnhance { radius } => ToolCommand::new(&self.tools.helper)
                .arg("confidence")
                .flag_path("--in", job.input(0)?)
                .flag("--radius", radius.to_string())
                .flag_path("--out", out),
            RasterOp::Regularize { radius } => {
                ToolCommand::new("otbcli_ClassificationMapRegularization")
                    .flag_path("-io.in", job.input(0)?)
                    .flag_path("-io.out", out)
                    .flag("-ip.radius", radius.to_string())
                    .flag("-ip.suvbool", "1")
                    .flag("-ip.nodatalabel", "0")
                    .flag("-ip.undecidedlabel", "20")
            }
            RasterOp::ConfusionMatrix { reference } => {
                ToolCommand::new("otbcli_ComputeConfusionMatrix")
                    .flag_path("-in", job.input(0)?)
                    .flag("-ref", "vector")
                    .flag_path("-ref.vector.in", reference)
                    .flag("-ref.vector.field", "class")
                    .flag("-nodatalabel", "0")
                    .flag_path("-out", out)
            }
            RasterOp::ColorMapping { lut } => ToolCommand::new("otbcli_ColorMapping")
                .flag_path("-in", job.input(0)?)
                .flag("-method", "custom")
                .flag_path("-method.custom.lut", lut)
                .flag_path("-out", out),
            RasterOp::Contours { dilatation_radius } => ToolCommand::new(&self.tools.helper)
                .arg("contours")
                .flag_path("--in", job.input(0)?)
                .flag("--dilatation-radius", dilatation_radius.to_string())
                .flag_path("--out", out),
            RasterOp::ContourOverlay { contours } => ToolCommand::new(&self.tools.helper)
                .arg("overlay")
                .flag_path("--image", job.input(0)?)
                .flag_path("--contours", contours)
                .flag_path("--out", out),
        };
        Ok(cmd)
    }
}

impl<R: CommandRunner> RasterEngine for OtbRasterEngine<R> {
    fn run(&self, job: &RasterJob) -> Result<()> {
        let cmd = self.command(job)?;
        if let Some(parent) = job.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.runner.run(&cmd)?;
        info!(op = job.op.name(), output = %job.output.display(), "Raster operation done");
        Ok(())
    }

    fn spatial_ref(&self, raster: &Path) -> Result<SpatialRef> {
        let cmd = ToolCommand::new("gdalsrsinfo").flag("-o", "epsg").arg_path(raster);
        let output = self.runner.run(&cmd)?;
        output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .filter(|line| !line.ends_with(":-1"))
            .map(SpatialRef::new)
            .ok_or_else(|| {
                AlcdError::config(format!(
                    "could not determine the spatial reference of {}",
                    raster.display()
                ))
            })
    }
}

fn ogr_driver(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("shp") => "ESRI Shapefile",
        Some(ext) if ext.eq_ignore_ascii_case("gpkg") => "GPKG",
        _ => "GeoJSON",
    }
}

/// Number of bands described by a `ComputeImagesStatistics` XML file
pub fn band_count(xml: &str) -> Result<usize> {
    let section = Regex::new(r#"(?s)<Statistic\s+name="mean"\s*>(.*?)</Statistic>"#)
        .map_err(|e| AlcdError::config(e.to_string()))?;
    let value = Regex::new(r"<StatisticVector\b").map_err(|e| AlcdError::config(e.to_string()))?;

    let body = section
        .captures(xml)
        .and_then(|c| c.get(1))
        .ok_or_else(|| AlcdError::config("image statistics have no `mean` section"))?;
    Ok(value.find_iter(body.as_str()).count())
}

/// Pixel counts per class from a `PolygonClassStatistics` XML file
pub fn samples_per_class(xml: &str) -> Result<Vec<u64>> {
    let section = Regex::new(r#"(?s)<Statistic\s+name="samplesPerClass"\s*>(.*?)</Statistic>"#)
        .map_err(|e| AlcdError::config(e.to_string()))?;
    let entry = Regex::new(r#"<StatisticMap\s+key="[^"]*"\s+value="(\d+)""#)
        .map_err(|e| AlcdError::config(e.to_string()))?;

    let body = section
        .captures(xml)
        .and_then(|c| c.get(1))
        .ok_or_else(|| AlcdError::config("class statistics have no `samplesPerClass` section"))?;
    entry
        .captures_iter(body.as_str())
        .map(|c| {
            c[1].parse::<u64>()
                .map_err(|e| AlcdError::config(format!("bad class count: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::testing::RecordingRunner;
    use tempfile::TempDir;

    const IMAGE_STATS: &str = r#"<?xml version="1.0" ?>
<FeatureStatistics>
    <Statistic name="mean">
        <StatisticVector value="1021.5" />
        <StatisticVector value="987.25" />
        <StatisticVector value="1400" />
    </Statistic>
    <Statistic name="stddev">
        <StatisticVector value="12.5" />
        <StatisticVector value="10" />
        <StatisticVector value="9" />
    </Statistic>
</FeatureStatistics>"#;

    const CLASS_STATS: &str = r#"<?xml version="1.0" ?>
<GeneralStatistics>
    <Statistic name="samplesPerClass">
        <StatisticMap key="2" value="5400" />
        <StatisticMap key="3" value="820" />
        <StatisticMap key="5" value="12000" />
    </Statistic>
    <Statistic name="samplesPerVector">
        <StatisticMap key="0" value="9" />
    </Statistic>
</GeneralStatistics>"#;

    #[test]
    fn test_sampling_strategy_from_str() {
        assert_eq!("smallest".parse::<SamplingStrategy>().unwrap(), SamplingStrategy::Smallest);
        assert_eq!("constant".parse::<SamplingStrategy>().unwrap(), SamplingStrategy::ConstantMin);
        assert_eq!(
            "constant_8000".parse::<SamplingStrategy>().unwrap(),
            SamplingStrategy::Constant(8000)
        );
        assert!("constant_".parse::<SamplingStrategy>().is_err());
        assert!("periodic".parse::<SamplingStrategy>().is_err());
        assert_eq!(SamplingStrategy::Constant(50).to_string(), "constant_50");
    }

    #[test]
    fn test_band_count() {
        assert_eq!(band_count(IMAGE_STATS).unwrap(), 3);
        assert!(band_count("<FeatureStatistics/>").is_err());
    }

    #[test]
    fn test_samples_per_class_ignores_other_maps() {
        assert_eq!(samples_per_class(CLASS_STATS).unwrap(), vec![5400, 820, 12000]);
    }

    #[test]
    fn test_constant_min_uses_smallest_class() {
        let dir = TempDir::new().unwrap();
        let stats = dir.path().join("class_stats.xml");
        std::fs::write(&stats, CLASS_STATS).unwrap();

        let engine = OtbRasterEngine::new(RecordingRunner::new());
        let job = RasterJob::new(
            RasterOp::SampleSelection {
                mask: "no_data.tif".into(),
                class_statistics: stats,
                rates: "rates.csv".into(),
                strategy: SamplingStrategy::ConstantMin,
            },
            vec!["image.tif".into(), "train.shp".into()],
            "samples.sqlite",
        );
        let cmd = engine.command(&job).unwrap();
        assert_eq!(cmd.program, "otbcli_SampleSelection");
        let tail = &cmd.args[cmd.args.len() - 4..];
        assert_eq!(tail, ["-strategy", "constant", "-strategy.constant.nb", "820"]);
    }

    #[test]
    fn test_regularize_command() {
        let engine = OtbRasterEngine::new(RecordingRunner::new());
        let job = RasterJob::new(
            RasterOp::Regularize { radius: 3 },
            vec!["labeled.tif".into()],
            "labeled_regular.tif",
        );
        assert_eq!(
            engine.command(&job).unwrap().display(),
            "otbcli_ClassificationMapRegularization -io.in labeled.tif -io.out labeled_regular.tif \
             -ip.radius 3 -ip.suvbool 1 -ip.nodatalabel 0 -ip.undecidedlabel 20"
        );
    }

    #[test]
    fn test_missing_input_is_configuration_error() {
        let engine = OtbRasterEngine::new(RecordingRunner::new());
        let job = RasterJob::new(RasterOp::SampleExtraction, vec!["image.tif".into()], "out.sqlite");
        assert!(matches!(engine.command(&job), Err(AlcdError::Configuration(_))));
    }

    #[test]
    fn test_spatial_ref_from_gdalsrsinfo() {
        let runner = RecordingRunner::new().with_stdout("\nEPSG:32631\n");
        let engine = OtbRasterEngine::new(runner.clone());
        let srs = engine.spatial_ref(Path::new("image.tif")).unwrap();
        assert_eq!(srs.name(), "EPSG:32631");
        assert_eq!(runner.programs(), vec!["gdalsrsinfo"]);

        let unknown = OtbRasterEngine::new(RecordingRunner::new().with_stdout("EPSG:-1\n"));
        assert!(unknown.spatial_ref(Path::new("image.tif")).is_err());
    }
}
