use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgGroup, Parser};

use backdrop_blur::{
    default_output_path, BlurOptions, CommandProvider, Compositor, MaskFileProvider,
    ProcessResult, RadiusPolicy,
};

#[derive(Parser)]
#[command(
    name = "backdrop-blur",
    about = "Blur an image's background while keeping the subject sharp",
    version,
    group(ArgGroup::new("segmentation").required(true).args(["mask", "segmenter"])),
    after_help = "The subject mask comes from --mask (a precomputed image) or --segmenter\n\
                  (an external program that writes the foreground PNG to stdout).\n\
                  Use {input} in --segmenter-arg to mark where the input path goes."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: String,

    /// Output file or directory (default: {name}_blurred.png)
    #[arg(short, long)]
    output: Option<String>,

    /// Blur radius in pixels (default: 20, or 10 with --store)
    #[arg(short, long)]
    radius: Option<f32>,

    /// Precomputed foreground mask image
    #[arg(long)]
    mask: Option<PathBuf>,

    /// External segmentation program
    #[arg(long)]
    segmenter: Option<PathBuf>,

    /// Argument passed to the segmentation program (repeatable)
    #[arg(long = "segmenter-arg", allow_hyphen_values = true)]
    segmenter_args: Vec<String>,

    /// Store the result in this directory under a sanitized, unique name
    #[arg(long, conflicts_with = "output")]
    store: Option<PathBuf>,

    /// Name to store the result under (default: the input's name)
    #[arg(long, requires = "store")]
    name: Option<String>,

    /// Print the result as a base64 data URL instead of writing a file
    #[arg(long, conflicts_with_all = ["output", "store"])]
    data_url: bool,

    /// Directory for segmentation scratch files (default: system temp dir)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Maximum accepted input size in bytes (0 disables the limit)
    #[arg(long, default_value_t = backdrop_blur::DEFAULT_MAX_INPUT_BYTES)]
    max_input_bytes: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(opts: &BlurOptions) {
    let level = if opts.verbose {
        "debug"
    } else if opts.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let opts = BlurOptions {
        scratch_dir: cli.scratch_dir.clone().unwrap_or_else(std::env::temp_dir),
        max_input_bytes: (cli.max_input_bytes > 0).then_some(cli.max_input_bytes),
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    init_logging(&opts);

    let compositor = match (&cli.mask, &cli.segmenter) {
        (Some(mask), _) => Compositor::new(MaskFileProvider::new(mask), opts),
        (None, Some(program)) => Compositor::new(
            CommandProvider::new(program, cli.segmenter_args.clone()),
            opts,
        ),
        (None, None) => unreachable!("clap requires one segmentation source"),
    };

    let input_path = Path::new(&cli.input);
    if !input_path.exists() {
        eprintln!("Error: Input path does not exist: {}", cli.input);
        process::exit(1);
    }

    if input_path.is_dir() {
        let Some(output_dir) = cli.output.as_deref().map(PathBuf::from) else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: backdrop-blur <input_dir> -o <output_dir> --mask <file>");
            process::exit(1);
        };
        let results = compositor.process_directory(input_path, &output_dir, cli.radius);
        report(&results, compositor.options());
        return;
    }

    if let Some(store_dir) = &cli.store {
        run_store(&compositor, &cli, input_path, store_dir);
        return;
    }

    if cli.data_url {
        run_data_url(&compositor, &cli, input_path);
        return;
    }

    let output_path = cli
        .output
        .as_deref()
        .map_or_else(|| default_output_path(input_path), PathBuf::from);
    let result = compositor.process_file(input_path, &output_path, cli.radius);
    report(&[result], compositor.options());
}

fn read_input(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_else(|e| {
        eprintln!("Error: Failed to read {}: {e}", path.display());
        process::exit(1);
    })
}

fn run_store(compositor: &Compositor, cli: &Cli, input_path: &Path, store_dir: &Path) {
    let bytes = read_input(input_path);
    let original_name = input_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    match compositor.process_to_store(
        &bytes,
        &original_name,
        cli.name.as_deref(),
        store_dir,
        cli.radius,
    ) {
        Ok(stored) => {
            if !cli.quiet {
                eprintln!(
                    "[OK] {original_name} -> {} ({} bytes)",
                    stored.path.display(),
                    stored.file_size
                );
            }
            println!("{}", stored.filename);
        }
        Err(e) => {
            eprintln!("[FAIL] {original_name}: {e}");
            process::exit(1);
        }
    }
}

fn run_data_url(compositor: &Compositor, cli: &Cli, input_path: &Path) {
    let bytes = read_input(input_path);
    let radius = RadiusPolicy::Direct.resolve(cli.radius);
    match compositor.blur_background(&bytes, radius) {
        Ok(result) => {
            let mut stdout = std::io::stdout().lock();
            if writeln!(stdout, "{}", result.to_data_url()).is_err() {
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("[FAIL] {}: {e}", input_path.display());
            process::exit(1);
        }
    }
}

fn report(results: &[ProcessResult], opts: &BlurOptions) {
    let mut success_count = 0u32;
    let mut fail_count = 0u32;

    for r in results {
        print_result(r, opts);
        if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 && !opts.quiet {
        eprintln!();
        eprint!("[Summary] Processed: {success_count}");
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

fn print_result(result: &ProcessResult, opts: &BlurOptions) {
    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.success {
        if !opts.quiet {
            match &result.output {
                Some(out) => eprintln!("[OK] {filename} -> {}", out.display()),
                None => eprintln!("[OK] {filename}"),
            }
        }
    } else {
        eprintln!("[FAIL] {filename}: {}", result.message);
    }

    if opts.verbose && !result.message.is_empty() {
        match result.failed_stage {
            Some(stage) => eprintln!("  -> {} (stage: {stage:?})", result.message),
            None => eprintln!("  -> {}", result.message),
        }
    }
}
