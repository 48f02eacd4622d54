//! `hoverlink` – hoverboard link node.
//!
//! 1. Loads `~/.hoverlink/config.toml`, writing the defaults on first run.
//! 2. Opens the transports the configured mode needs: the serial port (or
//!    an in-process hoverboard double with `sim = true`), the console port
//!    for `passthrough` and the UDP radio.
//! 3. Runs the control loop on its own thread and prints link events from
//!    the diagnostic bus.
//! 4. Drops the user into a REPL; Ctrl-C stops the loop.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, warn};

use hoverlink_hal::serial::SerialWiredLink;
use hoverlink_hal::sim::SimWiredLink;
use hoverlink_hal::udp::UdpWirelessLink;
use hoverlink_hal::{WirelessLink, wired};
use hoverlink_middleware::{
    DiagnosticBus, DiagnosticPayload, Diagnostics, SimHoverboard, Topic, TracingSink,
};
use hoverlink_runtime::{LinkPlan, Transports, init_tracing, setup_communication};

/// How often the hoverboard double services its serial buffer.
const SIM_STEP: Duration = Duration::from_millis(2);

/// Minimum spacing of printed telemetry lines.
const TELEMETRY_PRINT_INTERVAL: Duration = Duration::from_secs(1);

fn main() {
    let (mut cfg, loaded) = match config::load() {
        Ok(Some(cfg)) => (cfg, Ok(true)),
        Ok(None) => (config::Config::default(), Ok(false)),
        Err(e) => (config::Config::default(), Err(e)),
    };

    if !matches!(loaded, Ok(true)) {
        config::apply_env_overrides(&mut cfg);
    }

    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the level; HOVERLINK_LOG_FORMAT=json switches to JSON.
    let _tracing = init_tracing("hoverlink", cfg.markup);

    print_banner();

    match loaded {
        Ok(true) => println!(
            "  Config loaded from {}",
            config::config_path().display().to_string().bold()
        ),
        Ok(false) => match config::save(&config::Config::default()) {
            Ok(()) => println!(
                "  {} Default config written to {}",
                "✓".green().bold(),
                config::config_path().display().to_string().bold()
            ),
            Err(e) => println!("{}: {}", "Error saving config".red(), e),
        },
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the control loop …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Transports ────────────────────────────────────────────────────────
    let transports = match open_transports(&cfg, &shutdown) {
        Ok(t) => t,
        Err(e) => {
            println!("{}: {}", "Transport error".red(), e);
            return;
        }
    };

    // ── Diagnostics ───────────────────────────────────────────────────────
    let bus = DiagnosticBus::default();
    let mut diagnostics = Diagnostics::disabled().with_bus(bus.clone());
    if cfg.markup {
        diagnostics = diagnostics.with_markup(Arc::new(TracingSink));
    }

    let comm = match setup_communication(&cfg.communication(), transports, diagnostics) {
        Ok(comm) => comm,
        Err(e) => {
            println!("{}: {}", "Setup failed".red(), e);
            return;
        }
    };

    if let Some(report) = &comm.relay {
        println!(
            "  Relay wired: {} serial→radio, {} radio→serial, {} skipped",
            report.a_to_b.len(),
            report.b_to_a.len(),
            report.skipped.len()
        );
    }

    let Some(endpoint) = comm
        .wired_endpoint
        .clone()
        .or_else(|| comm.wireless_endpoint.clone())
    else {
        println!("{}", "No endpoint configured.".red());
        return;
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };
    runtime.spawn(print_link_events(bus.clone()));
    if cfg.telemetry {
        runtime.spawn(print_telemetry(bus));
    }

    // ── Control loop ──────────────────────────────────────────────────────
    let mut scheduler = comm.scheduler;
    let loop_shutdown = shutdown.clone();
    let control = thread::Builder::new()
        .name("hoverlink-control".into())
        .spawn(move || scheduler.run(&loop_shutdown));
    let control = match control {
        Ok(handle) => handle,
        Err(e) => {
            println!("{}: {}", "Failed to start control loop".red(), e);
            return;
        }
    };

    println!(
        "  Mode {}, control period {} ms.",
        mode_name(cfg.mode).bold(),
        cfg.control_period_ms
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    // The REPL blocks on stdin, so it lives on a detached thread; the main
    // thread waits for the control loop instead.
    let session = repl::Session {
        handle: comm.handle,
        motor: comm.motor,
        endpoint,
        registry: comm.registry,
        links: comm.links,
    };
    let repl_shutdown = shutdown.clone();
    if let Err(e) = thread::Builder::new()
        .name("hoverlink-repl".into())
        .spawn(move || repl::run(session, repl_shutdown))
    {
        warn!(error = %e, "Failed to start REPL; running until Ctrl-C");
    }

    if control.join().is_err() {
        error!("Control loop panicked");
    }
    runtime.shutdown_timeout(Duration::from_millis(100));
    println!("{}", "  ✓ Exiting hoverlink.".green());
}

fn mode_name(plan: LinkPlan) -> &'static str {
    match plan {
        LinkPlan::WiredOnly => "wired",
        LinkPlan::WirelessOnly => "wireless",
        LinkPlan::Relay => "relay",
        LinkPlan::Passthrough => "passthrough",
    }
}

fn open_transports(cfg: &config::Config, shutdown: &Arc<AtomicBool>) -> Result<Transports, String> {
    let mut transports = Transports::default();

    if cfg.mode.uses_wired() {
        if cfg.sim {
            let link = SimWiredLink::new("sim-serial");
            spawn_sim_hoverboard(link.clone(), shutdown.clone())?;
            transports.wired = Some(wired::shared(link));
            println!("  Serial: {}", "simulated hoverboard".yellow());
        } else {
            let link = SerialWiredLink::open(&cfg.serial.port, cfg.serial.baud)
                .map_err(|e| e.to_string())?;
            transports.wired = Some(wired::shared(link));
            println!(
                "  Serial: {} @ {} baud",
                cfg.serial.port.bold(),
                cfg.serial.baud
            );
        }
    }

    if cfg.mode == LinkPlan::Passthrough {
        let port = cfg
            .serial
            .console_port
            .as_deref()
            .ok_or("passthrough mode needs serial.console_port")?;
        let link = SerialWiredLink::open(port, cfg.serial.baud).map_err(|e| e.to_string())?;
        transports.console = Some(wired::shared(link));
        println!("  Console: {} mirrored onto the motor link", port.bold());
    }

    if cfg.mode.uses_wireless() {
        let udp = cfg.udp_config()?;
        let link = UdpWirelessLink::bind(udp).map_err(|e| e.to_string())?;
        println!(
            "  Radio:  {} as {}",
            cfg.udp.bind.bold(),
            link.address().to_string().bold()
        );
        let link: Arc<dyn WirelessLink> = Arc::new(link);
        transports.wireless = Some(link);
    }

    Ok(transports)
}

fn spawn_sim_hoverboard(link: SimWiredLink, shutdown: Arc<AtomicBool>) -> Result<(), String> {
    let mut board = SimHoverboard::new(link);
    thread::Builder::new()
        .name("hoverlink-sim".into())
        .spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                board.step();
                thread::sleep(SIM_STEP);
            }
        })
        .map(|_| ())
        .map_err(|e| format!("Failed to start hoverboard simulation: {}", e))
}

async fn print_link_events(bus: DiagnosticBus) {
    let mut rx = bus.subscribe_to(Topic::Link);
    while let Some(event) = rx.recv().await {
        if let DiagnosticPayload::Link(link_event) = event.payload {
            println!(
                "\n  {} [{}] {:?}",
                event.timestamp.format("%H:%M:%S").to_string().dimmed(),
                event.source.cyan(),
                link_event
            );
        }
    }
}

async fn print_telemetry(bus: DiagnosticBus) {
    let mut rx = bus.subscribe_to(Topic::Telemetry);
    let mut last_print: Option<Instant> = None;
    while let Some(event) = rx.recv().await {
        let DiagnosticPayload::Telemetry(t) = event.payload else {
            continue;
        };
        if last_print.is_some_and(|at| at.elapsed() < TELEMETRY_PRINT_INTERVAL) {
            continue;
        }
        last_print = Some(Instant::now());
        println!(
            "\n  {} speed {:.2} km/h  steer {:.2} km/h  {:.1} V  {:.2}/{:.2} A",
            "telemetry".dimmed(),
            t.speed_kmh,
            t.steer_kmh,
            t.battery_voltage,
            t.motor_current[0],
            t.motor_current[1]
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  __                          ___       __  "#.bold().cyan());
    println!("{}", r#" / /  ___ _  _____ ____ ___ / (_)__  / /__"#.bold().cyan());
    println!("{}", r#"/ _ \/ _ \ |/ / -_) __/___// / / _ \/  '_/"#.bold().cyan());
    println!("{}", r#"/_//_/\___/___/\__/_/     /_/_/_//_/_/\_\ "#.bold().cyan());
    println!();
    println!("  {}", "Hoverboard remote link".dimmed());
    println!();
}
