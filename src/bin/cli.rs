use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use swingcam::{DualCameraRig, RigConfig};

const USAGE: &str = "Usage: swingcam <command> [args]

Commands:
  list-devices [--json]          List attached cameras
  init-config [path]             Write a default config file
  record <seconds>               Record one manual session
  auto [--seconds <n>]           Motion-triggered recording until Ctrl-C

Options:
  --config <path>                Config file (default swingcam.toml)
  --synthetic                    Use synthetic cameras instead of devices
  --json                         Machine-readable output";

struct Options {
    config: Option<PathBuf>,
    synthetic: bool,
    json: bool,
    seconds: Option<f64>,
    positional: Vec<String>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self> {
        let mut opts = Options {
            config: None,
            synthetic: false,
            json: false,
            seconds: None,
            positional: Vec::new(),
        };

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    i += 1;
                    let path = args.get(i).ok_or_else(|| anyhow!("--config needs a path"))?;
                    opts.config = Some(PathBuf::from(path));
                }
                "--seconds" => {
                    i += 1;
                    let value = args.get(i).ok_or_else(|| anyhow!("--seconds needs a value"))?;
                    opts.seconds = Some(value.parse().context("--seconds")?);
                }
                "--synthetic" => opts.synthetic = true,
                "--json" => opts.json = true,
                other => opts.positional.push(other.to_string()),
            }
            i += 1;
        }
        Ok(opts)
    }

    fn load_config(&self) -> Result<RigConfig> {
        match &self.config {
            Some(path) => RigConfig::load_from_file(path)
                .with_context(|| format!("loading {}", path.display())),
            None => Ok(RigConfig::load_or_default()),
        }
    }
}

fn main() -> Result<()> {
    swingcam::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let opts = Options::parse(&args[2..])?;
    match args[1].as_str() {
        "list-devices" => cmd_list_devices(&opts),
        "init-config" => cmd_init_config(&opts),
        "record" => cmd_record(&opts),
        "auto" => cmd_auto(&opts),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "camera")]
fn cmd_list_devices(opts: &Options) -> Result<()> {
    let devices = swingcam::platform::list_devices()?;
    if opts.json {
        println!("{}", serde_json::to_string(&devices)?);
    } else if devices.is_empty() {
        println!("No cameras found");
    } else {
        for d in devices {
            println!("{}: {} ({})", d.id, d.name, d.description);
        }
    }
    Ok(())
}

#[cfg(not(feature = "camera"))]
fn cmd_list_devices(_opts: &Options) -> Result<()> {
    bail!("built without the `camera` feature; only --synthetic capture is available")
}

fn cmd_init_config(opts: &Options) -> Result<()> {
    let path = opts
        .positional
        .first()
        .map(PathBuf::from)
        .or_else(|| opts.config.clone())
        .unwrap_or_else(RigConfig::default_path);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    RigConfig::default().save_to_file(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn build_rig(opts: &Options, config: RigConfig) -> Result<DualCameraRig> {
    let mut builder = DualCameraRig::builder(config);
    if opts.synthetic {
        builder = builder.synthetic(Some(Duration::from_secs(8)));
    }
    Ok(builder.build()?)
}

fn install_ctrlc() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;
    Ok(running)
}

fn cmd_record(opts: &Options) -> Result<()> {
    let seconds: f64 = opts
        .positional
        .first()
        .ok_or_else(|| anyhow!("Usage: swingcam record <seconds>"))?
        .parse()
        .context("seconds")?;
    if !(seconds > 0.0) {
        bail!("seconds must be positive");
    }

    let mut config = opts.load_config()?;
    config.detector.auto_mode = false;
    let running = install_ctrlc()?;
    let rig = build_rig(opts, config)?;

    rig.start_session()?;
    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while running.load(Ordering::SeqCst) && Instant::now() < deadline && rig.is_recording() {
        thread::sleep(Duration::from_millis(50));
    }

    // The supervisor may already have ended the session on a failure
    let session = match rig.stop_session() {
        Ok(session) => session,
        Err(swingcam::RigError::NoActiveSession) => rig
            .controller()
            .last_session()
            .ok_or_else(|| anyhow!("session ended without a record"))?,
        Err(e) => return Err(e.into()),
    };
    rig.shutdown();

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        println!(
            "Session {}: {} pairs, {} dropped, {:.1}s",
            session.id,
            session.frames_written,
            session.dropped_pairs,
            session.elapsed().as_secs_f64()
        );
        for file in &session.files {
            println!("  {}", file.display());
        }
        if let Some(error) = &session.error {
            println!("  error: {}", error);
        }
    }
    Ok(())
}

fn cmd_auto(opts: &Options) -> Result<()> {
    let mut config = opts.load_config()?;
    config.detector.auto_mode = true;
    let running = install_ctrlc()?;
    let rig = build_rig(opts, config)?;

    let started = Instant::now();
    let limit = opts.seconds.map(Duration::from_secs_f64);
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) && limit.map_or(true, |l| started.elapsed() < l) {
        thread::sleep(Duration::from_millis(100));
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let status = rig.status();
            if opts.json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!(
                    "{:?} signal={} recording={} pairs={} skew_max={}us",
                    status.detector.state,
                    status
                        .detector
                        .latest_signal
                        .map_or("-".to_string(), |s| format!("{:.1}", s)),
                    status.controller.active_session.is_some(),
                    status.sync.pairs_emitted,
                    status.sync.max_skew_us
                );
            }
        }
    }

    rig.shutdown();
    if let Some(last) = rig.controller().last_session() {
        println!(
            "Last session {}: {} pairs in {:?}",
            last.id, last.frames_written, last.files
        );
    }
    Ok(())
}
