//! Multi-kernel Lenia CLI - Run simulations from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use multi_lenia::{
    compute::{Propagator, SimulationStats},
    schema::{Seed, SimulationConfig},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [steps]", args[0]);
        eprintln!();
        eprintln!("Run a multi-kernel Lenia simulation from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to simulation configuration file");
        eprintln!("  steps        Number of simulation steps (default: 100)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        #[cfg(feature = "gpu")]
        eprintln!("Pass --gpu after the arguments to reduce mass on the GPU.");
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let steps: u64 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);

    // Load configuration
    let config = SimulationConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    // Load or create seed
    let seed = load_seed(&config_path.with_extension("seed.json")).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });

    println!("Multi-kernel Lenia Simulation");
    println!("=============================");
    println!("Grid: {}x{} ({:?} boundary)", config.width, config.height, config.boundary);
    println!(
        "Kernels: {} ({:?} combination)",
        config.rule.len(),
        config.rule.combination_mode()
    );
    println!("dt: {}", config.rule.dt());
    println!("Steps: {}", steps);
    println!();

    // Initialize
    let mut propagator = Propagator::from_seed(config, &seed).unwrap_or_else(|e| {
        eprintln!("Error creating propagator: {}", e);
        std::process::exit(1);
    });

    #[cfg(feature = "gpu")]
    if args.iter().any(|a| a == "--gpu") {
        use multi_lenia::compute::gpu::GpuMassReducer;

        match pollster::block_on(GpuMassReducer::new(propagator.field().len())) {
            Ok(reducer) => propagator.set_mass_reducer(Box::new(reducer)),
            Err(e) => eprintln!("GPU unavailable, reducing mass on the CPU: {}", e),
        }
    }

    println!("Convolution paths: {:?}", propagator.paths());
    println!("Mass backend: {}", propagator.mass_reducer_name());

    let initial_stats = SimulationStats::from_field(propagator.field());
    let initial_mass = propagator.compute_mass().unwrap_or_else(|e| {
        eprintln!("Error measuring mass: {}", e);
        std::process::exit(1);
    });

    println!("Initial state:");
    println!("  Total mass: {:.6}", initial_mass);
    println!("  Active cells: {}", initial_stats.active_cells);
    println!(
        "  Value range: [{:.6}, {:.6}]",
        initial_stats.min_value, initial_stats.max_value
    );
    println!();

    // Run simulation
    println!("Running simulation...");
    let start = Instant::now();

    for i in 0..steps {
        if let Err(e) = propagator.step() {
            eprintln!("Simulation stopped at step {}: {}", i + 1, e);
            std::process::exit(1);
        }

        // Print progress every 10%
        if (i + 1) % (steps / 10).max(1) == 0 {
            let stats = SimulationStats::from_field(propagator.field());
            let elapsed = start.elapsed().as_secs_f32();
            let steps_per_sec = (i + 1) as f32 / elapsed;
            println!(
                "  Step {}/{}: mass={:.6}, active={}, {:.1} steps/s",
                i + 1,
                steps,
                stats.total_mass,
                stats.active_cells,
                steps_per_sec
            );
        }
    }

    let elapsed = start.elapsed();
    let final_stats = SimulationStats::from_field(propagator.field());
    let final_mass = propagator.compute_mass().unwrap_or(final_stats.total_mass);

    println!();
    println!("Final state:");
    println!("  Total mass: {:.6}", final_mass);
    println!("  Active cells: {}", final_stats.active_cells);
    println!(
        "  Value range: [{:.6}, {:.6}]",
        final_stats.min_value, final_stats.max_value
    );
    println!();
    if let Some(drift) = propagator.mass_drift() {
        println!("Mass drift from target: {:.4}%", drift * 100.0);
    }
    println!(
        "Time: {:.2}s ({:.1} steps/s)",
        elapsed.as_secs_f32(),
        steps as f32 / elapsed.as_secs_f32()
    );
}

fn load_seed(path: &Path) -> Result<Seed, String> {
    if !path.exists() {
        return Ok(Seed::default());
    }
    let seed_str =
        fs::read_to_string(path).map_err(|e| format!("Error reading seed file: {}", e))?;
    serde_json::from_str(&seed_str).map_err(|e| format!("Error parsing seed: {}", e))
}

fn print_example_config() {
    let config = SimulationConfig::default();
    let seed = Seed::default();

    match (config.to_json_pretty(), serde_json::to_string_pretty(&seed)) {
        (Ok(config_json), Ok(seed_json)) => {
            println!("Example configuration (config.json):");
            println!("{}", config_json);
            println!();
            println!("Example seed (config.seed.json):");
            println!("{}", seed_json);
        }
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error serializing example: {}", e);
            std::process::exit(1);
        }
    }
}
