use super::{highlight, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use isomer_core::{Engine, EngineOptions, Stage};
use isomer_runtime::MasteringBackend;
use isomer_schema::{load_flavor_config, locate_flavor, ValidateOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct BuildArgs<'a> {
    pub flavor: &'a Path,
    pub source: &'a Path,
    pub outfile: &'a Path,
    pub working: Option<&'a Path>,
    pub volume_id: Option<&'a str>,
    pub quiet: bool,
    pub check_prereqs: bool,
    pub json: bool,
}

impl BuildArgs<'_> {
    /// Interactive progress goes to the terminal only for plain, non-quiet runs.
    fn shows_progress(&self) -> bool {
        !self.quiet && !self.json
    }
}

pub fn run(args: &BuildArgs<'_>, backend: Arc<dyn MasteringBackend>) -> Result<u8, String> {
    let flavor_path = locate_flavor(args.flavor).map_err(|e| format!("flavor error: {e}"))?;
    info!("using flavor {}", flavor_path.display());

    let options = ValidateOptions {
        default_volume_id: args.volume_id.map(str::to_owned),
    };
    let flavor =
        load_flavor_config(&flavor_path, &options).map_err(|e| format!("flavor error: {e}"))?;

    if args.check_prereqs {
        let missing = isomer_runtime::check_mastering_prereqs(flavor.checksum);
        if !missing.is_empty() {
            return Err(isomer_runtime::format_missing(&missing));
        }
    }

    let engine = Engine::new(
        args.source,
        args.outfile,
        EngineOptions {
            working: args.working.map(Path::to_path_buf),
            quiet: args.quiet,
        },
        backend,
    )
    .map_err(|e| e.to_string())?;

    let mut pb = None;
    let result = engine.generate(&flavor, |stage| {
        debug!("stage: {stage}");
        if stage == Stage::Checksum && args.shows_progress() {
            pb = Some(spinner("implanting checksum..."));
        }
    });

    let report = match result {
        Ok(report) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "checksum implanted");
            }
            report
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "checksum failed");
            }
            return Err(e.to_string());
        }
    };

    if args.json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "created {} (volume {})",
            highlight(&report.outfile.display().to_string()),
            report.volume_id
        );
        println!(
            "{} directories, {} files, {} excluded, {} overlaid",
            report.manifest.directories,
            report.manifest.files,
            report.manifest.excluded,
            report.manifest.linked
        );
    }
    Ok(EXIT_SUCCESS)
}
