//! REPL for the hoverlink shell.
//!
//! Supported slash-commands:
//!   /help                 – show this list
//!   /buzz <freq> <pattern> <duration> – queue a buzzer command
//!   /drive <pwm> <steer>  – set the drive command
//!   /stop                 – zero the drive command
//!   /status               – link states, measured speed and controller telemetry
//!   /peers                – paired wireless peers
//!   /quit | /exit         – stop the control loop and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hoverlink_middleware::{EndpointHandle, ProtocolEndpoint, SharedRegistry};
use hoverlink_runtime::{MotorCommand, MotorState, SchedulerHandle, TransportStatus};
use hoverlink_types::{BuzzerCommand, LinkDirection, LinkState, TransportLink};

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Buzz(BuzzerCommand),
    Drive(MotorCommand),
    Status,
    Peers,
    Quit,
}

/// Parse a slash-command. The error is the message shown to the operator.
pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty input".to_string());
    };
    let args: Vec<&str> = words.collect();
    match head {
        "/help" => Ok(ReplCommand::Help),
        "/status" => Ok(ReplCommand::Status),
        "/peers" => Ok(ReplCommand::Peers),
        "/quit" | "/exit" => Ok(ReplCommand::Quit),
        "/stop" => Ok(ReplCommand::Drive(MotorCommand::default())),
        "/drive" => {
            let [pwm, steer] = args.as_slice() else {
                return Err("usage: /drive <pwm> <steer>".to_string());
            };
            Ok(ReplCommand::Drive(MotorCommand {
                pwm: parse_arg(pwm, "pwm")?,
                steer: parse_arg(steer, "steer")?,
            }))
        }
        "/buzz" => {
            let [freq, pattern, duration] = args.as_slice() else {
                return Err("usage: /buzz <freq> <pattern> <duration>".to_string());
            };
            Ok(ReplCommand::Buzz(BuzzerCommand::new(
                parse_arg(freq, "freq")?,
                parse_arg(pattern, "pattern")?,
                parse_arg(duration, "duration")?,
            )))
        }
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn parse_arg<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("invalid {} '{}'", name, raw))
}

/// Handles into the running link stack.
pub struct Session {
    pub handle: SchedulerHandle,
    pub motor: MotorState,
    pub endpoint: EndpointHandle,
    pub registry: Option<SharedRegistry>,
    pub links: TransportStatus,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(session: Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "hoverlink>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(ReplCommand::Help) => cmd_help(),
            Ok(ReplCommand::Buzz(command)) => cmd_buzz(&session, command),
            Ok(ReplCommand::Drive(command)) => {
                session.motor.set_command(command);
                println!(
                    "  drive pwm={} steer={}",
                    command.pwm.to_string().bold(),
                    command.steer.to_string().bold()
                );
            }
            Ok(ReplCommand::Status) => cmd_status(&session),
            Ok(ReplCommand::Peers) => cmd_peers(&session),
            Ok(ReplCommand::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    e.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "  Available commands:".bold());
    println!("    {}  – queue a buzzer command", "/buzz <freq> <pattern> <duration>".cyan());
    println!("    {}               – set the drive command", "/drive <pwm> <steer>".cyan());
    println!("    {}                              – zero the drive command", "/stop".cyan());
    println!("    {}                            – links, speed and telemetry", "/status".cyan());
    println!("    {}                             – paired wireless peers", "/peers".cyan());
    println!("    {}                      – exit", "/quit | /exit".cyan());
    println!();
}

fn cmd_buzz(session: &Session, command: BuzzerCommand) {
    if session.handle.set_buzzer(command) {
        println!("  {} buzzer queued for the next cycle", "✓".green().bold());
    } else {
        println!("  {} an all-zero buzzer command does nothing", "!".yellow().bold());
    }
}

fn cmd_status(session: &Session) {
    let measured = session.motor.measured();
    let telemetry = session.endpoint.lock().telemetry();
    println!();
    for link in session.links.links() {
        println!("  {:<16} {}", format!("{} link", link.kind).bold(), link_summary(link));
    }
    println!("  {:<16} {:.2} km/h", "speed".bold(), measured.speed_kmh);
    println!("  {:<16} {:.2} km/h", "steer".bold(), measured.steer_kmh);
    println!("  {:<16} {:.2} V", "battery".bold(), telemetry.battery_voltage);
    println!(
        "  {:<16} {:.2} A / {:.2} A",
        "motor current".bold(),
        telemetry.motor_current[0],
        telemetry.motor_current[1]
    );
    let pending = if session.handle.buzzer_pending() { "pending".yellow() } else { "idle".dimmed() };
    println!("  {:<16} {}", "buzzer".bold(), pending);
    println!();
}

/// `paired (both ways)` and the like.
fn link_summary(link: TransportLink) -> String {
    let state = match link.state {
        LinkState::Paired => "paired",
        LinkState::Unpaired => "unpaired",
        LinkState::Idle => "idle",
    };
    let direction = match link.direction {
        LinkDirection::Send => "send only",
        LinkDirection::Receive => "receive only",
        LinkDirection::Both => "both ways",
    };
    format!("{} ({})", state, direction)
}

fn cmd_peers(session: &Session) {
    let Some(registry) = session.registry.as_ref() else {
        println!("  {}", "No wireless link in this mode.".dimmed());
        return;
    };
    let registry = registry.lock();
    if registry.is_empty() {
        println!("  {}", "No peer paired yet.".dimmed());
    }
    for entry in registry.peers() {
        println!("    • {} ({:?})", entry.address.to_string().bold(), entry.state);
    }
    let broadcast = if registry.broadcast_hidden() { "hidden" } else { "visible" };
    println!("  broadcast: {}", broadcast);
}
