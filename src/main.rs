//! plant_doctor CLI
//!
//! Hosts the diagnosis service: loads configuration, builds the pipeline once
//! and runs predictions, catalog queries and the advisory helpers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use plant_doctor::advisory::{
    AlertColor, MarketBoard, MarketLookup, WeatherAdvisory, WeatherCondition,
};
use plant_doctor::backend::backend_name;
use plant_doctor::inference::{BackendKind, BatchPredictionStats, PredictionResult};
use plant_doctor::utils::logging::{init_logging, LogConfig, LogLevel};
use plant_doctor::utils::{format_millis, format_progress_bar};
use plant_doctor::{AdviceRepository, DiseasePredictionService, ServiceConfig};

/// Image extensions picked up when predicting a directory
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Plant leaf disease diagnosis
///
/// Classifies a leaf photo with a Burn, TFLite or ONNX model and returns the
/// disease with localized treatment advice.
#[derive(Parser, Debug)]
#[command(name = "plant_doctor")]
#[command(author = "Warre Snaet")]
#[command(version)]
#[command(about = "Plant leaf disease diagnosis with localized advice", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PLANT_DOCTOR_LOG")]
    log_level: Option<String>,

    /// Service configuration file (TOML)
    #[arg(short, long, global = true, env = "PLANT_DOCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Model artifact, overrides the configuration
    #[arg(short, long, global = true, env = "PLANT_DOCTOR_MODEL")]
    model: Option<PathBuf>,

    /// Model backend (burn, tflite, onnx), overrides the configuration
    #[arg(long, global = true, env = "PLANT_DOCTOR_BACKEND")]
    backend: Option<BackendKind>,

    /// Label mapping file, overrides the configuration
    #[arg(long, global = true, env = "PLANT_DOCTOR_LABELS")]
    labels: Option<PathBuf>,

    /// Print machine-readable JSON instead of formatted text
    #[arg(long, global = true, default_value = "false")]
    json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Diagnose a leaf image, or every image in a directory
    Predict {
        /// Path to an image file or directory
        input: PathBuf,

        /// Number of ranked classes to report
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Confidence threshold used in the batch summary
        #[arg(long, default_value = "0.5")]
        threshold: f32,
    },

    /// Show whether the model is loaded
    Status,

    /// List detectable diseases in class-index order
    Labels,

    /// Show treatment advice for a disease label
    Advice {
        /// Disease label, e.g. Tomato_Early_blight
        disease: String,
    },

    /// Show crop prices across Ethiopian markets
    Market {
        /// Crop to search for (case-insensitive); lists crops when omitted
        crop: Option<String>,

        /// Market data file (JSON); the built-in board is used otherwise
        #[arg(long, env = "PLANT_DOCTOR_MARKET_DATA")]
        data: Option<PathBuf>,
    },

    /// Show watering advice for the current weather
    Weather {
        /// Location reported with the advice
        #[arg(short, long, default_value = "Central Ethiopia")]
        location: String,

        /// Known condition (sunny, rainy, cloudy); simulated when omitted
        #[arg(long)]
        condition: Option<WeatherCondition>,

        /// Known temperature in °C; simulated when omitted
        #[arg(long)]
        temperature: Option<i32>,

        /// Seed for the simulated reading
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(LogLevel::parse(level));
    }

    let _ = init_logging(&log_config);

    if !cli.json {
        print_banner();
    }

    match &cli.command {
        Commands::Predict {
            input,
            top_k,
            threshold,
        } => {
            let mut config = load_config(&cli)?;
            if let Some(k) = top_k {
                config.service.top_k = *k;
            }
            let service = build_service(&config)?;
            cmd_predict(&service, input, *threshold, cli.json)?;
        }

        Commands::Status => {
            let config = load_config(&cli)?;
            let service = build_service(&config)?;
            cmd_status(&service, cli.json)?;
        }

        Commands::Labels => {
            let config = load_config(&cli)?;
            let service = build_service(&config)?;
            cmd_labels(&service, cli.json)?;
        }

        Commands::Advice { disease } => {
            let config = load_config(&cli)?;
            cmd_advice(&config, disease, cli.json)?;
        }

        Commands::Market { crop, data } => {
            cmd_market(data.as_deref(), crop.as_deref(), cli.json)?;
        }

        Commands::Weather {
            location,
            condition,
            temperature,
            seed,
        } => {
            cmd_weather(location, *condition, *temperature, *seed, cli.json)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════════════╗
 ║   🌱 plant_doctor                                                    ║
 ║   Leaf Disease Diagnosis with Burn + tract                           ║
 ║   Treatment advice in English and Amharic                            ║
 ╚══════════════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

/// File configuration with CLI and environment overrides applied
fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    if let Some(model) = &cli.model {
        config = config.with_artifact(model);
    }
    if let Some(backend) = cli.backend {
        config.model.backend = backend;
    }
    if let Some(labels) = &cli.labels {
        config.catalog.labels_path = labels.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_service(config: &ServiceConfig) -> Result<DiseasePredictionService> {
    info!("Compute backend: {}", backend_name());
    let service = DiseasePredictionService::from_config(config)
        .context("Failed to start the diagnosis service")?;

    if !service.ready() {
        warn!("No model loaded; predictions will report 'model not loaded'");
    }
    Ok(service)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn cmd_predict(
    service: &DiseasePredictionService,
    input: &Path,
    threshold: f32,
    json: bool,
) -> Result<()> {
    if input.is_file() {
        let result = service.predict_file(input);
        if json {
            print_json(&result)?;
        } else {
            print_prediction(&result);
        }
        return Ok(());
    }

    if !input.is_dir() {
        anyhow::bail!("Input not found: {}", input.display());
    }

    let images: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image(e.path()))
        .map(|e| e.into_path())
        .collect();

    info!("Found {} images in {}", images.len(), input.display());

    let pb = ProgressBar::new(images.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    if json {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let results: Vec<PredictionResult> = images
        .par_iter()
        .map(|path| {
            let result = service.predict_file(path);
            pb.inc(1);
            result
        })
        .collect();
    pb.finish_with_message("Done");

    let stats = BatchPredictionStats::from_predictions(&results, threshold);

    if json {
        #[derive(Serialize)]
        struct BatchOutput<'a> {
            results: &'a [PredictionResult],
            stats: &'a BatchPredictionStats,
        }
        return print_json(&BatchOutput {
            results: &results,
            stats: &stats,
        });
    }

    for result in &results {
        print_prediction(result);
    }

    println!("{}", "Batch Summary:".cyan().bold());
    println!("  Images:          {}", stats.total_images);
    println!("  Diagnosed:       {}", stats.succeeded.to_string().green());
    println!("  Failed:          {}", stats.failed.to_string().red());
    println!(
        "  ≥ {:.0}% confident: {}",
        threshold * 100.0,
        stats.high_confidence_count
    );
    println!(
        "  Latency:         avg {} / min {} / max {}",
        format_millis(stats.avg_time_per_image_ms),
        format_millis(stats.min_time_ms),
        format_millis(stats.max_time_ms)
    );

    Ok(())
}

fn print_prediction(result: &PredictionResult) {
    if let Some(path) = &result.image_path {
        println!("{} {}", "Image:".cyan(), path.display());
    }

    if !result.success {
        println!(
            "  {} {}",
            "✗".red(),
            result.error.as_deref().unwrap_or("prediction failed")
        );
        println!();
        return;
    }

    let label = result.disease_label.as_deref().unwrap_or("-");
    let confidence = result.confidence.unwrap_or(0.0);
    println!(
        "  {} {} {}",
        "✓".green(),
        label.bold(),
        format!("({:.1}%)", confidence * 100.0).dimmed()
    );

    for p in result.top_predictions.iter().skip(1) {
        println!(
            "    {:40} {}",
            p.label,
            format_progress_bar(p.probability as f64, 20)
        );
    }

    if let Some(advice) = &result.advice {
        println!("  {} {}", "Treatment:".yellow(), advice.treatment);
        println!("  {} {}", "ሕክምና:".yellow(), advice.localized_treatment);
        for tip in &advice.prevention_tips {
            println!("    - {}", tip);
        }
        println!("  {} {}", "Organic:".yellow(), advice.organic_options);
    }
    if let Some(ms) = result.inference_time_ms {
        println!("  {} {}", "Inference:".dimmed(), format_millis(ms));
    }
    println!();
}

fn cmd_status(service: &DiseasePredictionService, json: bool) -> Result<()> {
    let status = service.status();
    if json {
        return print_json(&status);
    }

    println!("{}", "Service Status:".cyan().bold());
    let ready = if status.ready {
        "ready".green()
    } else {
        "model not loaded".red()
    };
    println!("  Status:   {}", ready);
    println!(
        "  Backend:  {}",
        status.backend.as_deref().unwrap_or("-")
    );
    if let Some(artifact) = &status.artifact {
        println!("  Artifact: {}", artifact.display());
    }
    if let Some(err) = &status.load_error {
        println!("  Error:    {}", err.yellow());
    }
    println!("  Diseases detectable: {}", status.diseases_detectable);
    Ok(())
}

fn cmd_labels(service: &DiseasePredictionService, json: bool) -> Result<()> {
    if json {
        return print_json(&service.capabilities());
    }

    println!("{}", "Detectable Diseases:".cyan().bold());
    for (idx, label) in service.labels().iter() {
        let marker = if service.advice().has_specific_advice(label) {
            "✓".green()
        } else {
            "·".dimmed()
        };
        println!("  {:>3}  {} {}", idx, marker, label);
    }
    Ok(())
}

fn cmd_advice(config: &ServiceConfig, disease: &str, json: bool) -> Result<()> {
    let repository = match &config.catalog.advice_path {
        Some(path) => AdviceRepository::load(path)?,
        None => AdviceRepository::builtin(),
    };
    let entry = repository.advice_for(disease);

    if json {
        return print_json(entry);
    }

    println!("{} {}", "Advice for".cyan().bold(), disease.bold());
    if !repository.has_specific_advice(disease) {
        println!("  {}", "No specific entry; showing general guidance".yellow());
    }
    println!("  Treatment: {}", entry.treatment);
    println!("  ሕክምና:    {}", entry.localized_treatment);
    if !entry.prevention_tips.is_empty() {
        println!("  Prevention:");
        for tip in &entry.prevention_tips {
            println!("    - {}", tip);
        }
    }
    println!("  Organic:   {}", entry.organic_options);
    Ok(())
}

fn cmd_market(data: Option<&Path>, crop: Option<&str>, json: bool) -> Result<()> {
    let board = match data {
        Some(path) => MarketBoard::from_path(path)?,
        None => MarketBoard::builtin(),
    };
    let lookup = board.lookup(crop);

    if json {
        return print_json(&lookup);
    }

    match lookup {
        MarketLookup::Available { available_crops } => {
            println!("{}", "Available Crops:".cyan().bold());
            for crop in available_crops {
                println!("  - {}", crop);
            }
        }
        MarketLookup::Found(prices) => {
            println!(
                "{} {} ({} per {})",
                "Prices for".cyan().bold(),
                prices.crop.bold(),
                prices.currency,
                prices.unit
            );
            for (rank, entry) in prices.markets.iter().enumerate() {
                let price = format!("{:>10.2}", entry.price);
                let price = if rank == 0 { price.green() } else { price.normal() };
                println!("  {:20} {}", entry.market, price);
            }
        }
        MarketLookup::NotFound {
            error,
            available_crops,
        } => {
            println!("{} {}", "Error:".red(), error);
            println!("  Available: {}", available_crops.join(", "));
        }
    }
    Ok(())
}

fn cmd_weather(
    location: &str,
    condition: Option<WeatherCondition>,
    temperature: Option<i32>,
    seed: u64,
    json: bool,
) -> Result<()> {
    let advisory = match (condition, temperature) {
        (Some(condition), Some(temperature)) => {
            WeatherAdvisory::for_conditions(location, condition, temperature)
        }
        (condition, temperature) => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut advisory = WeatherAdvisory::simulate(location, &mut rng);
            if let Some(condition) = condition {
                advisory = advisory.with_condition(condition);
            }
            if let Some(temperature) = temperature {
                advisory = advisory.with_temperature(temperature);
            }
            advisory
        }
    };

    if json {
        return print_json(&advisory);
    }

    let alert = match advisory.ui_color {
        AlertColor::Blue => advisory.alert_amharic.blue(),
        AlertColor::Red => advisory.alert_amharic.red(),
        AlertColor::Green => advisory.alert_amharic.green(),
    };

    println!("{} {}", "Weather for".cyan().bold(), advisory.location.bold());
    println!(
        "  Condition:   {} {}",
        advisory.condition,
        advisory.temperature_label()
    );
    println!("  Alert:       {}", alert.bold());
    println!("  Advice:      {}", advisory.recommendation_amharic);
    Ok(())
}
