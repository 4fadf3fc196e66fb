use env_logger::{Builder, Env, Target};
use playdeck::app::{self, AppOptions};
use playdeck::{config, instance};
use std::fs::OpenOptions;
use std::path::PathBuf;

#[derive(Debug)]
struct CliArgs {
    null_audio: bool,
    single_instance: bool,
    port: u16,
    paths: Vec<String>,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            null_audio: false,
            single_instance: true,
            port: instance::DEFAULT_PORT,
            paths: Vec::new(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    init_logging();

    let mut guard = None;
    if args.single_instance {
        if let Some(file) = instance::first_audio_arg(&args.paths) {
            let file = config::normalize_path(&file);
            if instance::forward_to_running(args.port, &file)? {
                log::info!("handed {} to the running player", file.display());
                println!("playdeck is already running, opened {}", file.display());
                return Ok(());
            }
        }
        guard = match instance::InstanceGuard::bind(args.port) {
            Ok(guard) => Some(guard),
            Err(err) => {
                log::warn!("single-instance port unavailable: {err:#}");
                None
            }
        };
    }

    app::run(AppOptions {
        null_audio: args.null_audio,
        instance: guard,
        initial_paths: args.paths.iter().map(PathBuf::from).collect(),
    })
}

/// Logs go to a file because the terminal belongs to the UI.
fn init_logging() {
    let Ok(log_path) = config::ensure_config_dir().and_then(|_| config::log_path()) else {
        return;
    };
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) else {
        return;
    };

    let _ = Builder::from_env(Env::default().default_filter_or("playdeck=info"))
        .target(Target::Pipe(Box::new(file)))
        .try_init();
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--null-audio" => out.null_audio = true,
            "--no-instance" => out.single_instance = false,
            "--port" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--port requires a value");
                };
                out.port = match value.trim().parse::<u16>() {
                    Ok(port) if port > 0 => port,
                    _ => anyhow::bail!("--port must be between 1 and 65535"),
                };
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with("--") => anyhow::bail!("unknown argument {other}"),
            path => out.paths.push(path.to_string()),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("playdeck [OPTIONS] [PATH...]");
    println!("  --null-audio      Run without an audio device");
    println!("  --no-instance     Do not forward to or act as the running player");
    println!("  --port N          Localhost port for the single-instance check");
    println!("  PATH              Audio files or folders to add on startup");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parses_flags_and_paths() {
        let parsed = parse_args(args(&["--null-audio", "--port", "5000", "a.mp3", "music"]))
            .expect("valid args");
        assert!(parsed.null_audio);
        assert!(parsed.single_instance);
        assert_eq!(parsed.port, 5000);
        assert_eq!(parsed.paths, args(&["a.mp3", "music"]));
    }

    #[test]
    fn rejects_bad_port_and_unknown_flags() {
        assert!(parse_args(args(&["--port"])).is_err());
        assert!(parse_args(args(&["--port", "0"])).is_err());
        assert!(parse_args(args(&["--port", "nope"])).is_err());
        assert!(parse_args(args(&["--shuffle"])).is_err());
    }
}
