use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use ohmfit::analysis::ac::SweepType;
use ohmfit::analysis::target::Factor;
use ohmfit::optim::Method;
use ohmfit::stats::Stats;
use ohmfit::{output, CancelToken, Engine, Event, MagnitudeMode, Settings};

#[derive(Clone, Copy, ValueEnum)]
enum Sweep {
    Dec,
    Oct,
    Lin,
}

impl From<Sweep> for SweepType {
    fn from(s: Sweep) -> Self {
        match s {
            Sweep::Dec => SweepType::Dec,
            Sweep::Oct => SweepType::Oct,
            Sweep::Lin => SweepType::Lin,
        }
    }
}

/// Symbolic AC analysis and component-value fitting
#[derive(Parser)]
#[command(name = "ohmfit", version)]
struct Cli {
    /// SPICE-style netlist file
    netlist: PathBuf,

    /// Settings file (TOML); command-line options take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Driving source, e.g. Vin
    #[arg(long)]
    input: Option<String>,

    /// Output selector, e.g. 'V(out)'
    #[arg(long)]
    output: Option<String>,

    /// Lowest frequency (Hz)
    #[arg(long)]
    fmin: Option<f64>,

    /// Highest frequency (Hz)
    #[arg(long)]
    fmax: Option<f64>,

    /// Number of frequency points (per interval with --sweep)
    #[arg(long)]
    points: Option<usize>,

    /// Frequency grid spacing
    #[arg(long, value_enum)]
    sweep: Option<Sweep>,

    /// Report linear magnitude instead of dB
    #[arg(long)]
    linear: bool,

    /// Target real pole (Hz); repeatable
    #[arg(long = "pole", value_name = "HZ")]
    poles: Vec<f64>,

    /// Target real zero (Hz); repeatable
    #[arg(long = "zero", value_name = "HZ")]
    zeros: Vec<f64>,

    /// Target gain magnitude
    #[arg(long)]
    gain: Option<f64>,

    /// Fit the free values to the target
    #[arg(long)]
    optimize: bool,

    /// Optimizer: trf or de
    #[arg(long)]
    method: Option<Method>,

    /// Write the regenerated netlist here instead of stdout
    #[arg(long, value_name = "FILE")]
    write: Option<PathBuf>,

    /// Print performance stats to stderr
    #[arg(long)]
    stats: bool,
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, e);
    std::process::exit(1);
}

fn settings_from(cli: &Cli) -> Settings {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .unwrap_or_else(|e| fail(&format!("Error reading {}", path.display()), e)),
        None => Settings::default(),
    };
    if let Some(input) = &cli.input {
        settings.input = input.clone();
    }
    if let Some(output) = &cli.output {
        settings.output = output.clone();
    }
    if let Some(f) = cli.fmin {
        settings.freq_min = f;
    }
    if let Some(f) = cli.fmax {
        settings.freq_max = f;
    }
    if let Some(n) = cli.points {
        settings.npoints = n;
    }
    if let Some(sweep) = cli.sweep {
        settings.sweep = Some(sweep.into());
    }
    if let Some(method) = cli.method {
        settings.optimizer.method = method;
    }
    if let Some(gain) = cli.gain {
        settings.target.gain = gain;
    }
    if !cli.poles.is_empty() || !cli.zeros.is_empty() {
        settings.target.factors = cli
            .poles
            .iter()
            .map(|&f0| Factor::RealPole { f0 })
            .chain(cli.zeros.iter().map(|&f0| Factor::RealZero { f0 }))
            .collect();
    }
    settings
        .validate()
        .unwrap_or_else(|e| fail("Invalid settings", e));
    settings
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut stats = if cli.stats { Some(Stats::new()) } else { None };
    let settings = settings_from(&cli);
    let mode = if cli.linear {
        MagnitudeMode::Linear
    } else {
        MagnitudeMode::Decibel
    };

    let text = std::fs::read_to_string(&cli.netlist)
        .unwrap_or_else(|e| fail(&format!("Error reading {}", cli.netlist.display()), e));

    let mut engine = Engine::new(settings, |event: &Event| match event {
        Event::OptimStep(_) => tracing::debug!("{}", event.message()),
        _ => eprintln!("{}", event.message()),
    });

    let start = Instant::now();
    let circuit = engine.load(&text).unwrap_or_else(|_| std::process::exit(1));
    if let Some(s) = stats.as_mut() {
        s.add_phase("Parse + compile", start.elapsed());
        s.elements = circuit.netlist.elements.len();
        s.free_params = circuit.free_params().len();
        s.unknowns = circuit.system.size;
    }

    let start = Instant::now();
    if engine.solve().is_err() {
        std::process::exit(1);
    }
    if let Some(s) = stats.as_mut() {
        s.add_phase("Symbolic solve", start.elapsed());
    }

    let initial = Stats::time(stats.as_mut(), "Evaluate", || engine.initial_response(mode))
        .unwrap_or_else(|e| fail("Evaluation error", e));
    if let Some(s) = stats.as_mut() {
        s.frequency_points = initial.len();
    }

    let mut stdout = io::stdout();
    if !cli.optimize {
        output::write_response_csv(&initial, &mut stdout)
            .unwrap_or_else(|e| fail("Output error", e));
    } else {
        let cancel = CancelToken::new();
        let result = Stats::time(stats.as_mut(), "Optimize", || engine.optimize(&cancel))
            .unwrap_or_else(|_| std::process::exit(1));
        if let Some(s) = stats.as_mut() {
            s.iterations = result.iterations;
            s.evaluations = result.nfev;
        }

        let target = engine
            .target()
            .unwrap_or_else(|e| fail("Target error", e));
        let fitted = ohmfit::evaluate(&result.expr, &target.frequencies, MagnitudeMode::Decibel)
            .unwrap_or_else(|e| fail("Evaluation error", e));
        output::write_fit_csv(&target, &initial, &fitted, &mut stdout)
            .unwrap_or_else(|e| fail("Output error", e));

        let netlist = engine
            .generate(&result)
            .unwrap_or_else(|e| fail("Generate error", e));
        match &cli.write {
            Some(path) => std::fs::write(path, netlist)
                .unwrap_or_else(|e| fail(&format!("Error writing {}", path.display()), e)),
            None => {
                writeln!(stdout)
                    .and_then(|_| stdout.write_all(netlist.as_bytes()))
                    .unwrap_or_else(|e| fail("Output error", e));
            }
        }
    }

    if let Some(s) = stats.as_mut() {
        s.solves = engine.solver().solves();
        s.cache_hits = engine.solver().cache_hits();
        s.display();
    }
}
