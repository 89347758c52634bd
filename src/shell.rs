//! Interactive command shell of the binary.

use std::fmt::Write as _;
use std::io::Write as _;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::node::{NodeHandle, NodeSnapshot};
use crate::{Cost, NodeName};

const HELP: &str = "\
Available commands:
  connect <host> <port> <cost>   open a link to another node
  send <destination> <data...>   send a text packet
  show nodes|neighbors|route     inspect the local node
  edge <neighbor> <cost>         change the cost of a link
  help                           show this message
  exit                           stop the node
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTarget {
    Nodes,
    Neighbors,
    Route,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Connect { host: String, port: u16, cost: Cost },
    Send { destination: NodeName, data: String },
    Show(ShowTarget),
    Edge { neighbor: NodeName, cost: Cost },
    Help,
    Exit,
}

fn parse_number<T: FromStr>(value: Option<&str>, what: &str) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("missing {}", what))?;
    value.parse().map_err(|_| format!("invalid {}: {}", what, value))
}

impl FromStr for ShellCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let mut args = rest.split_whitespace();

        match command {
            "connect" => {
                let host = args.next().ok_or("usage: connect <host> <port> <cost>")?.to_string();
                let port = parse_number(args.next(), "port")?;
                let cost = parse_number(args.next(), "cost")?;
                Ok(ShellCommand::Connect { host, port, cost })
            }
            "send" => {
                let destination = args.next().ok_or("usage: send <destination> <data...>")?.to_string();
                let data = rest.trim_start()[destination.len()..].trim().to_string();
                if data.is_empty() {
                    return Err("usage: send <destination> <data...>".into());
                }
                Ok(ShellCommand::Send { destination, data })
            }
            "show" => match args.next() {
                Some("nodes") => Ok(ShellCommand::Show(ShowTarget::Nodes)),
                Some("neighbors") => Ok(ShellCommand::Show(ShowTarget::Neighbors)),
                Some("route") => Ok(ShellCommand::Show(ShowTarget::Route)),
                _ => Err("usage: show nodes|neighbors|route".into()),
            },
            "edge" => {
                let neighbor = args.next().ok_or("usage: edge <neighbor> <cost>")?.to_string();
                let cost = parse_number(args.next(), "cost")?;
                Ok(ShellCommand::Edge { neighbor, cost })
            }
            "help" => Ok(ShellCommand::Help),
            "exit" | "quit" => Ok(ShellCommand::Exit),
            other => Err(format!("unknown command: {} (try help)", other)),
        }
    }
}

pub fn format_nodes(snapshot: &NodeSnapshot) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Known nodes ({}):", snapshot.nodes.len());
    for node in &snapshot.nodes {
        let marker = if *node == snapshot.name { " (self)" } else { "" };
        let _ = writeln!(output, "  {}{}", node, marker);
    }
    output
}

pub fn format_neighbors(snapshot: &NodeSnapshot) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{:<20} {:<8} {:<12}", "Neighbor", "Cost", "Connected");
    let _ = writeln!(output, "{}", "-".repeat(42));

    if snapshot.neighbors.is_empty() {
        let _ = writeln!(output, "No neighbors");
    }
    for neighbor in &snapshot.neighbors {
        let age = chrono::Utc::now().signed_duration_since(neighbor.connected_at);
        let connected = if age.num_seconds() < 60 {
            format!("{}s ago", age.num_seconds())
        } else {
            format!("{}m ago", age.num_minutes())
        };
        let _ = writeln!(output, "{:<20} {:<8} {:<12}", neighbor.name, neighbor.cost, connected);
    }
    if let Some(coordinator) = &snapshot.coordinator {
        let _ = writeln!(output, "\nCoordinator: {}", coordinator);
    }
    output
}

pub fn format_routes(snapshot: &NodeSnapshot) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Routing table of {} ({}):", snapshot.name, snapshot.algorithm);
    let _ = writeln!(output, "{:<20} {:<10} {:<20}", "Destination", "Distance", "Next Hop");
    let _ = writeln!(output, "{}", "-".repeat(50));

    if snapshot.routes.is_empty() {
        let _ = writeln!(output, "No routes");
    }
    for (destination, route) in snapshot.routes.iter() {
        let _ = writeln!(output, "{:<20} {:<10} {:<20}", destination, route.distance, route.next_hop);
    }
    output
}

/// Run one command against the node. Errors come back as text, the node
/// keeps running.
pub async fn execute(handle: &NodeHandle, command: ShellCommand) -> String {
    let result = match command {
        ShellCommand::Connect { host, port, cost } => handle
            .connect(&host, port, cost)
            .await
            .map(|peer| format!("Connected to {} with cost {}\n", peer, cost)),
        ShellCommand::Send { destination, data } => handle
            .send(&destination, &data)
            .await
            .map(|()| format!("Sent to {}\n", destination)),
        ShellCommand::Show(target) => handle.snapshot().await.map(|snapshot| match target {
            ShowTarget::Nodes => format_nodes(&snapshot),
            ShowTarget::Neighbors => format_neighbors(&snapshot),
            ShowTarget::Route => format_routes(&snapshot),
        }),
        ShellCommand::Edge { neighbor, cost } => handle
            .set_edge_cost(&neighbor, cost)
            .await
            .map(|()| format!("Edge to {} is now {}\n", neighbor, cost)),
        ShellCommand::Help => Ok(HELP.to_string()),
        ShellCommand::Exit => Ok(String::new()),
    };

    result.unwrap_or_else(|e| format!("Error: {}\n", e))
}

fn prompt(name: &str) {
    print!("{}> ", name);
    let _ = std::io::stdout().flush();
}

/// Read commands from stdin until `exit` or end of input.
pub async fn run(handle: NodeHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt(handle.name());

    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            match line.parse::<ShellCommand>() {
                Ok(ShellCommand::Exit) => break,
                Ok(command) => print!("{}", execute(&handle, command).await),
                Err(e) => println!("{}", e),
            }
        }
        prompt(handle.name());
    }

    handle.shutdown();
    Ok(())
}
