use patch_mvs::config::{load_config, InputFormat, RuntimeConfig};
use patch_mvs::engine::Mvs;
use patch_mvs::io;
use std::env;
use std::path::{Path, PathBuf};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let program = env::args()
        .next()
        .unwrap_or_else(|| "mvs-densify".to_string());
    let cli = parse_args(&program)?;

    let config = load_config(&cli.config_path).map_err(|e| e.to_string())?;
    let mut engine = load_input(&config)?;

    if let Some(path) = &config.output.checkpoint_path {
        engine.set_checkpoint_path(Some(path.clone()));
    }

    engine.refine_seed_patches();
    println!("seed refinement kept {} patches", engine.patch_count());

    if !cli.skip_expansion {
        engine.expand_patches().map_err(|e| e.to_string())?;
        println!("expansion grew to {} patches", engine.patch_count());
    }

    engine.apply_filter_cascade();
    println!("filter cascade kept {} patches", engine.patch_count());

    if let Some(q) = config.quantization {
        engine.patch_quantization(q.theta_num, q.phi_num, q.dist_num);
    }

    write_outputs(&engine, &config)?;
    Ok(())
}

fn load_input(config: &RuntimeConfig) -> Result<Mvs, String> {
    let image_dir = config
        .image_dir
        .clone()
        .or_else(|| config.input_path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let engine = match config.input_format {
        InputFormat::Nvm => io::load_nvm(&config.input_path, &image_dir, config.params.clone()),
        InputFormat::Nvm2 => io::load_nvm2(&config.input_path, &image_dir, config.params.clone()),
        InputFormat::Mvs => {
            io::snapshot::load_mvs(&config.input_path, &image_dir, config.params.clone())
        }
    }
    .map_err(|e| e.to_string())?;

    println!(
        "loaded {} cameras and {} seed patches from {}",
        engine.cameras().len(),
        engine.patch_count(),
        config.input_path.display()
    );
    Ok(engine)
}

fn write_outputs(engine: &Mvs, config: &RuntimeConfig) -> Result<(), String> {
    if let Some(path) = &config.output.snapshot_out {
        io::write_mvs(path, &engine.snapshot()).map_err(|e| e.to_string())?;
        println!("snapshot written to {}", path.display());
    }
    if let Some(path) = &config.output.ply_out {
        io::write_ply(path, engine).map_err(|e| e.to_string())?;
        println!("PLY written to {}", path.display());
    }
    if let Some(path) = &config.output.psr_out {
        io::write_psr(path, engine).map_err(|e| e.to_string())?;
        println!("PSR points written to {}", path.display());
    }
    Ok(())
}

struct CliArgs {
    config_path: PathBuf,
    skip_expansion: bool,
}

fn parse_args(program: &str) -> Result<CliArgs, String> {
    let mut args = env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut skip_expansion = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("{}", usage(program));
                std::process::exit(0);
            }
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("--config expects a path\n{}", usage(program)))?;
                config_path = Some(PathBuf::from(value));
            }
            "--seeds-only" => {
                skip_expansion = true;
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown option '{arg}'\n{}", usage(program)));
            }
            _ => {
                if config_path.is_some() {
                    return Err(format!(
                        "Unexpected positional argument '{arg}'\n{}",
                        usage(program)
                    ));
                }
                config_path = Some(PathBuf::from(arg));
            }
        }
    }

    let config_path = config_path.ok_or_else(|| usage(program))?;
    Ok(CliArgs {
        config_path,
        skip_expansion,
    })
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} <config.json> [--seeds-only]\n\n\
Densifies a sparse reconstruction into an oriented point cloud.\n\
The JSON config names the input (NVM, NVM2 or native snapshot), the output\n\
paths (snapshot/PLY/PSR), optional quantization, and the engine parameters.\n\
Examples:\n  {program} jobs/temple.json\n  {program} jobs/temple.json --seeds-only\n"
    )
}
