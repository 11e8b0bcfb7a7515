use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use stalkdrive::can::{checksum_4bit, checksum_8bit, Frame};
use stalkdrive::codec::MessageSpec;
use stalkdrive::config::{Capabilities, ControllerConfig};
use stalkdrive::dbc;
use stalkdrive::SafetyMonitor;

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let matches = App::new("stalkdrive")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Frame tool for the stalk/servo actuation layer")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("checksum")
                .about("Compute the folded byte-sum checksum of a payload")
                .arg(
                    Arg::with_name("seed")
                        .long("seed")
                        .value_name("ID")
                        .help("Seed added to the sum, usually the message id (hex)")
                        .takes_value(true)
                        .default_value("0"),
                )
                .arg(
                    Arg::with_name("nibble")
                        .long("nibble")
                        .help("Fold further into a 4-bit checksum"),
                )
                .arg(
                    Arg::with_name("bytes")
                        .help("Payload bytes in hex, checksum field zeroed")
                        .required(true)
                        .multiple(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("encode")
                .about("Encode a database message from signal values")
                .arg(
                    Arg::with_name("bus")
                        .long("bus")
                        .value_name("BUS")
                        .takes_value(true)
                        .default_value("0"),
                )
                .arg(
                    Arg::with_name("message")
                        .help("Message name or id (hex)")
                        .required(true),
                )
                .arg(
                    Arg::with_name("signals")
                        .help("Signal values as NAME=VALUE")
                        .multiple(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("decode")
                .about("Decode a frame against the database")
                .arg(Arg::with_name("id").help("Message id (hex)").required(true))
                .arg(
                    Arg::with_name("bytes")
                        .help("Payload bytes in hex")
                        .required(true)
                        .multiple(true),
                ),
        )
        .subcommand(SubCommand::with_name("messages").about("List the signal database"))
        .subcommand(
            SubCommand::with_name("fwd")
                .about("Where the safety monitor relays a frame")
                .arg(Arg::with_name("bus").help("Source bus").required(true))
                .arg(Arg::with_name("id").help("Message id (hex)").required(true)),
        )
        .subcommand(
            SubCommand::with_name("config")
                .about("Print the default configuration, or validate a file")
                .arg(
                    Arg::with_name("file")
                        .help("JSON configuration to validate")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("fingerprint")
                        .long("fingerprint")
                        .value_name("BUS:ID")
                        .help("Detect capabilities from (bus, id) pairs instead of using defaults")
                        .takes_value(true)
                        .multiple(true),
                ),
        )
        .get_matches();

    let json = matches.value_of("format") == Some("json");

    let result = match matches.subcommand() {
        ("checksum", Some(sub)) => cmd_checksum(sub, json),
        ("encode", Some(sub)) => cmd_encode(sub, json),
        ("decode", Some(sub)) => cmd_decode(sub, json),
        ("messages", Some(_)) => cmd_messages(json),
        ("fwd", Some(sub)) => cmd_fwd(sub, json),
        ("config", Some(sub)) => cmd_config(sub),
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|_| format!("invalid hex number '{}'", s))
}

/// Accepts "fc ff", "fcff" or "0xFC 0xFF".
fn parse_hex_bytes<'a>(parts: impl Iterator<Item = &'a str>) -> Result<Vec<u8>, String> {
    let mut digits = String::new();
    for part in parts {
        digits.push_str(part.trim_start_matches("0x").trim_start_matches("0X"));
    }
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("invalid hex digit '{}' in '{}'", bad, digits));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{}'", digits));
    }
    // All ASCII from here, so byte pairs are whole characters
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex '{}'", pair))
        })
        .collect()
}

fn lookup_message(name_or_id: &str) -> Result<&'static MessageSpec, String> {
    dbc::by_name(name_or_id)
        .or_else(|| parse_hex_u32(name_or_id).ok().and_then(dbc::by_id))
        .ok_or_else(|| format!("unknown message '{}'", name_or_id))
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

fn cmd_checksum(sub: &ArgMatches, json: bool) -> CliResult {
    let seed = parse_hex_u32(sub.value_of("seed").unwrap_or("0"))?;
    let bytes = parse_hex_bytes(sub.values_of("bytes").into_iter().flatten())?;
    let checksum = if sub.is_present("nibble") {
        checksum_4bit(&bytes, seed)
    } else {
        checksum_8bit(&bytes, seed)
    };

    if json {
        println!("{}", serde_json::json!({ "seed": seed, "checksum": checksum }));
    } else {
        println!("{} {:#04X}", "checksum:".cyan(), checksum);
    }
    Ok(())
}

fn cmd_encode(sub: &ArgMatches, json: bool) -> CliResult {
    let spec = lookup_message(sub.value_of("message").unwrap_or_default())?;
    let bus: u8 = sub.value_of("bus").unwrap_or("0").parse()?;

    let mut values = Vec::new();
    for pair in sub.values_of("signals").into_iter().flatten() {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", pair))?;
        values.push((name, value.parse::<f64>()?));
    }

    let frame = spec.encode(bus, &values)?;
    if json {
        println!("{}", serde_json::to_string(&frame)?);
    } else {
        println!(
            "{} bus {} id {:#05X} [{}] {}",
            spec.name.bold(),
            frame.bus,
            frame.id,
            frame.len(),
            hex(&frame.data).green()
        );
    }
    Ok(())
}

fn cmd_decode(sub: &ArgMatches, json: bool) -> CliResult {
    let id = parse_hex_u32(sub.value_of("id").unwrap_or_default())?;
    let spec = dbc::by_id(id).ok_or_else(|| format!("unknown message id {:#X}", id))?;
    let bytes = parse_hex_bytes(sub.values_of("bytes").into_iter().flatten())?;
    let frame = Frame::new(0, id, &bytes)?;
    let values = spec.decode(&frame)?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = values
            .iter()
            .map(|(name, value)| ((*name).to_string(), serde_json::json!(value)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
        return Ok(());
    }

    println!("{} ({:#05X})", spec.name.bold(), id);
    for (name, value) in &values {
        println!("  {:<28} {}", name.cyan(), value);
    }
    if spec.checksum.is_some() {
        let status = if spec.verify_checksum(&frame) {
            "ok".green()
        } else {
            "MISMATCH".red().bold()
        };
        println!("  {:<28} {}", "checksum".cyan(), status);
    }
    Ok(())
}

fn cmd_messages(json: bool) -> CliResult {
    if json {
        let list: Vec<_> = dbc::ALL_MESSAGES
            .iter()
            .map(|m| serde_json::json!({ "name": m.name, "id": m.id, "len": m.len, "signals": m.signals.len() }))
            .collect();
        println!("{}", serde_json::Value::Array(list));
        return Ok(());
    }

    for m in dbc::ALL_MESSAGES {
        println!("{:#05X}  {:<28} {} bytes", m.id, m.name.bold(), m.len);
        for s in m.signals {
            println!("        {:<28} {}|{} x{}", s.name, s.start_bit, s.size, s.factor);
        }
    }
    Ok(())
}

fn cmd_fwd(sub: &ArgMatches, json: bool) -> CliResult {
    let bus: u8 = sub.value_of("bus").unwrap_or("0").parse()?;
    let id = parse_hex_u32(sub.value_of("id").unwrap_or_default())?;
    let frame = Frame::zeroed(bus, id, 8)?;
    let destination = SafetyMonitor::new().fwd_hook(bus, &frame);

    if json {
        println!("{}", serde_json::json!({ "bus": bus, "id": id, "forward_to": destination }));
    } else {
        match destination {
            Some(to) => println!("{:#05X} bus {} -> bus {}", id, bus, to.to_string().green()),
            None => println!("{:#05X} bus {} -> {}", id, bus, "dropped".yellow()),
        }
    }
    Ok(())
}

fn cmd_config(sub: &ArgMatches) -> CliResult {
    if let Some(path) = sub.value_of("file") {
        let config = ControllerConfig::load(path)?;
        println!("{} {}", "valid:".green(), path);
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    let config = match sub.values_of("fingerprint") {
        Some(pairs) => {
            let mut fingerprint = Vec::new();
            for pair in pairs {
                let (bus, id) = pair
                    .split_once(':')
                    .ok_or_else(|| format!("expected BUS:ID, got '{}'", pair))?;
                fingerprint.push((bus.parse::<u8>()?, parse_hex_u32(id)?));
            }
            ControllerConfig::new(Capabilities::detect(&fingerprint)?)
        }
        None => ControllerConfig::default(),
    };
    println!("{}", config.to_json_pretty()?);
    Ok(())
}
