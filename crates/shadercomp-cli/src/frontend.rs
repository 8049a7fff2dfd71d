use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use shadercomp_combo::{Axis, AxisKind, ShaderConfig};
use shadercomp_vcs::VcsArchive;
use tracing::debug;

use crate::SourceParser;

/// Line-oriented front-end over the combo declarations embedded in shader
/// sources:
///
/// ```text
/// // STATIC: "FOG" "0..1"
/// // DYNAMIC: "LIGHTS" "0..3"
/// // SKIP: $FOG && $LIGHTS == 0
/// // CENTROID: 4
/// ```
///
/// Multiple `SKIP` lines OR together. `CENTROID: n` sets bit `n` of the
/// centroid mask. Everything else in the file is left to the external
/// compiler; this front-end does no preprocessing and resolves no includes.
#[derive(Debug, Default)]
pub struct FxcParser;

const STATIC_TAG: &str = "// STATIC:";
const DYNAMIC_TAG: &str = "// DYNAMIC:";
const SKIP_TAG: &str = "// SKIP:";
const CENTROID_TAG: &str = "// CENTROID:";

impl SourceParser for FxcParser {
    fn construct_name(&self, file: &str, target: &str, version: &str) -> String {
        let stem = file.rsplit('/').next().unwrap_or(file);
        let stem = stem.strip_suffix(".fxc").unwrap_or(stem);
        format!("{stem}_{target}{version}")
    }

    fn get_target(&self, file: &str) -> String {
        let stem = file.strip_suffix(".fxc").unwrap_or(file);
        for target in ["vs", "ps", "gs", "ds", "hs"] {
            if stem.ends_with(&format!("_{target}"))
                || stem.contains(&format!("_{target}2"))
                || stem.contains(&format!("_{target}3"))
            {
                return target.to_owned();
            }
        }
        "ps".to_owned()
    }

    fn check_crc(&self, source: &Path, root: &Path, name: &str) -> Result<(u32, bool)> {
        let bytes = fs::read(source)
            .with_context(|| format!("reading shader source {}", source.display()))?;
        let crc = crc32fast::hash(&bytes);
        let archive_path = shadercomp_vcs::vcs_path(root, name);
        let up_to_date = match fs::read(&archive_path) {
            Ok(existing) => match VcsArchive::parse(&existing) {
                Ok(archive) => archive.header().source_crc32 == crc,
                Err(e) => {
                    debug!(path = %archive_path.display(), "ignoring unreadable archive: {e}");
                    false
                }
            },
            Err(_) => false,
        };
        Ok((crc, up_to_date))
    }

    fn parse_file(
        &self,
        source: &Path,
        _root: &Path,
        target: &str,
        version: &str,
    ) -> Result<ShaderConfig> {
        let text = fs::read_to_string(source)
            .with_context(|| format!("reading shader source {}", source.display()))?;

        let mut axes = Vec::new();
        let mut skips = Vec::new();
        let mut centroid_mask = 0u32;
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            let context = |what: &str| format!("{}:{}: {what}", source.display(), number + 1);
            if let Some(rest) = line.strip_prefix(STATIC_TAG) {
                let (name, lo, hi) =
                    parse_axis_declaration(rest).with_context(|| context("STATIC"))?;
                axes.push(Axis::new(name, lo, hi, AxisKind::Static)?);
            } else if let Some(rest) = line.strip_prefix(DYNAMIC_TAG) {
                let (name, lo, hi) =
                    parse_axis_declaration(rest).with_context(|| context("DYNAMIC"))?;
                axes.push(Axis::new(name, lo, hi, AxisKind::Dynamic)?);
            } else if let Some(rest) = line.strip_prefix(SKIP_TAG) {
                let expr = rest.trim();
                if expr.is_empty() {
                    bail!("{}", context("empty SKIP expression"));
                }
                skips.push(expr.to_owned());
            } else if let Some(rest) = line.strip_prefix(CENTROID_TAG) {
                let bit: u32 = rest
                    .trim()
                    .parse()
                    .with_context(|| context("CENTROID bit index"))?;
                if bit >= 32 {
                    bail!("{}", context("CENTROID bit index out of range"));
                }
                centroid_mask |= 1 << bit;
            }
        }

        let skip = match skips.len() {
            0 => String::new(),
            1 => skips.remove(0),
            _ => {
                let mut combined = String::new();
                for (i, expr) in skips.iter().enumerate() {
                    if i > 0 {
                        combined.push_str(" || ");
                    }
                    let _ = write!(combined, "({expr})");
                }
                combined
            }
        };

        Ok(ShaderConfig {
            // The caller stamps the canonical name and source CRC.
            name: String::new(),
            source_file: source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            entry_point: "main".to_owned(),
            target: target_profile(target, version),
            axes,
            skip,
            centroid_mask,
            source_crc32: 0,
        })
    }

    fn write_include(&self, path: &Path, config: &ShaderConfig, csgo: bool) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating include directory {}", dir.display()))?;
        }
        let mut out = String::new();
        let guard = config.name.to_uppercase().replace(['.', '-'], "_");
        let _ = writeln!(out, "// {}.inc", config.name);
        let _ = writeln!(out, "// Generated from {}; do not edit.", config.source_file);
        let _ = writeln!(out, "#ifndef {guard}_INC");
        let _ = writeln!(out, "#define {guard}_INC");
        let _ = writeln!(out);
        let mut scale = 1u64;
        for kind in [AxisKind::Dynamic, AxisKind::Static] {
            let label = match kind {
                AxisKind::Dynamic => "DYNAMIC",
                AxisKind::Static => "STATIC",
            };
            for axis in config.axes.iter().filter(|a| a.kind() == kind) {
                let _ = writeln!(
                    out,
                    "#define {guard}_{label}_{}_MIN {}",
                    axis.name(),
                    axis.lo()
                );
                let _ = writeln!(
                    out,
                    "#define {guard}_{label}_{}_MAX {}",
                    axis.name(),
                    axis.hi()
                );
                let _ = writeln!(
                    out,
                    "#define {guard}_{label}_{}_SCALE {scale}",
                    axis.name()
                );
                scale *= axis.count();
            }
        }
        if !config.skip.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "// SKIP: {}", config.skip);
        }
        if csgo {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "static const char *g_{}_ComboNames[] = {{",
                config.name
            );
            for axis in &config.axes {
                let _ = writeln!(out, "\t\"{}\",", axis.name());
            }
            let _ = writeln!(out, "}};");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "#endif // {guard}_INC");
        fs::write(path, out).with_context(|| format!("writing include {}", path.display()))
    }
}

/// `"NAME" "lo..hi"`.
fn parse_axis_declaration(rest: &str) -> Result<(String, i64, i64)> {
    let mut quoted = rest.split('"').skip(1).step_by(2);
    let name = quoted
        .next()
        .filter(|n| !n.is_empty())
        .context("expected a quoted axis name")?;
    let range = quoted.next().context("expected a quoted value range")?;
    let (lo, hi) = range
        .split_once("..")
        .with_context(|| format!("range {range:?} is not of the form lo..hi"))?;
    let lo: i64 = lo.trim().parse().context("bad range lower bound")?;
    let hi: i64 = hi.trim().parse().context("bad range upper bound")?;
    Ok((name.to_owned(), lo, hi))
}

/// Lowers a type and model version to the compiler's profile string, e.g.
/// `("ps", "20b")` to `ps_2_b` and `("vs", "30")` to `vs_3_0`.
fn target_profile(target: &str, version: &str) -> String {
    if version.is_empty() {
        return format!("{target}_0_0");
    }
    let (major, minor) = match version.split_at(1) {
        (major, "") => (major, "0"),
        // "20b" is profile 2_b, not 2_0b.
        (major, minor) if minor.len() > 1 && minor.starts_with('0') => (major, &minor[1..]),
        (major, minor) => (major, minor),
    };
    format!("{target}_{major}_{minor}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn axis_declarations_parse() {
        assert_eq!(
            parse_axis_declaration(" \"FOG\" \"0..1\"").unwrap(),
            ("FOG".to_owned(), 0, 1)
        );
        assert_eq!(
            parse_axis_declaration("\t\"LIGHTS\"  \"-1..3\"").unwrap(),
            ("LIGHTS".to_owned(), -1, 3)
        );
        assert!(parse_axis_declaration("\"FOG\"").is_err());
        assert!(parse_axis_declaration("\"FOG\" \"0-1\"").is_err());
    }

    #[test]
    fn profiles_lower_with_minor_versions() {
        assert_eq!(target_profile("ps", "30"), "ps_3_0");
        assert_eq!(target_profile("ps", "20b"), "ps_2_b");
        assert_eq!(target_profile("vs", "20"), "vs_2_0");
        assert_eq!(target_profile("ps", "41"), "ps_4_1");
    }

    #[test]
    fn names_combine_stem_target_and_version() {
        let parser = FxcParser;
        assert_eq!(parser.construct_name("water.fxc", "ps", "30"), "water_ps30");
        assert_eq!(
            parser.construct_name("shaders/depth_vs.fxc", "vs", "20"),
            "depth_vs_vs20"
        );
    }

    #[test]
    fn targets_infer_from_file_names() {
        let parser = FxcParser;
        assert_eq!(parser.get_target("depth_vs.fxc"), "vs");
        assert_eq!(parser.get_target("water_ps30.fxc"), "ps");
        assert_eq!(parser.get_target("unknown.fxc"), "ps");
    }

    #[test]
    fn parse_file_collects_axes_skips_and_centroid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("water.fxc");
        fs::write(
            &path,
            concat!(
                "// STATIC: \"FOG\" \"0..1\"\n",
                "// DYNAMIC: \"LIGHTS\" \"0..3\"\n",
                "// SKIP: $FOG && $LIGHTS == 0\n",
                "// SKIP: $LIGHTS == 3\n",
                "// CENTROID: 2\n",
                "float4 main() : COLOR { return 0; }\n",
            ),
        )
        .unwrap();
        let config = FxcParser
            .parse_file(&path, dir.path(), "ps", "20b")
            .unwrap();
        assert_eq!(config.axes.len(), 2);
        assert_eq!(config.axes[0].name(), "FOG");
        assert_eq!(config.target, "ps_2_b");
        assert_eq!(config.skip, "($FOG && $LIGHTS == 0) || ($LIGHTS == 3)");
        assert_eq!(config.centroid_mask, 1 << 2);
        assert_eq!(config.source_file, "water.fxc");
    }
}
