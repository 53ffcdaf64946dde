//! The interactive command console.
//!
//! A line-oriented front end over the controller verbs and the storage read
//! surface. It is deliberately thin: every command maps to one query or one
//! lifecycle call, and records print as JSON so the output pipes cleanly
//! into other tools.
use std::io::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use swarmscan_primitives::info_hash::InfoHash;
use swarmscan_primitives::node_id::NodeId;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::Crawler;
use crate::storage::queries::{InfoHashQueryOptions, InfoHashOrderBy, MetadataOrderBy, MetadataQueryOptions, NodeOrderBy, NodeQueryOptions};

const DEFAULT_LIST_LIMIT: u64 = 20;

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Stats,
    Nodes { limit: u64 },
    Node { id: NodeId },
    Infohashes { limit: u64 },
    Infohash { info_hash: InfoHash },
    Metadata { limit: u64 },
    Search { query: String },
    Start,
    Stop,
    Exit,
}

#[derive(Debug, PartialEq, Eq)]
enum ParseError {
    Empty,
    Unknown(String),
    BadArgument(String),
}

fn parse_command(line: &str) -> Result<Command, ParseError> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or(ParseError::Empty)?;

    let parse_limit = |word: Option<&str>| -> Result<u64, ParseError> {
        match word {
            None => Ok(DEFAULT_LIST_LIMIT),
            Some(word) => word.parse().map_err(|_| ParseError::BadArgument(word.to_string())),
        }
    };

    match verb {
        "help" => Ok(Command::Help),
        "stats" => Ok(Command::Stats),
        "nodes" => Ok(Command::Nodes {
            limit: parse_limit(words.next())?,
        }),
        "node" => {
            let word = words.next().ok_or_else(|| ParseError::BadArgument("missing node id".to_string()))?;
            let id = NodeId::from_str(word).map_err(|_| ParseError::BadArgument(word.to_string()))?;
            Ok(Command::Node { id })
        }
        "infohashes" => Ok(Command::Infohashes {
            limit: parse_limit(words.next())?,
        }),
        "infohash" => {
            let word = words
                .next()
                .ok_or_else(|| ParseError::BadArgument("missing infohash".to_string()))?;
            let info_hash = InfoHash::from_str(word).map_err(|_| ParseError::BadArgument(word.to_string()))?;
            Ok(Command::Infohash { info_hash })
        }
        "metadata" => Ok(Command::Metadata {
            limit: parse_limit(words.next())?,
        }),
        "search" => {
            let query = words.collect::<Vec<_>>().join(" ");
            if query.is_empty() {
                return Err(ParseError::BadArgument("missing search terms".to_string()));
            }
            Ok(Command::Search { query })
        }
        "start" => Ok(Command::Start),
        "stop" => Ok(Command::Stop),
        "exit" | "quit" => Ok(Command::Exit),
        verb => Err(ParseError::Unknown(verb.to_string())),
    }
}

const HELP: &str = "\
commands:
  help                 show this help
  stats                crawler and storage statistics
  nodes [limit]        most recently seen nodes
  node <hex>           one node by id
  infohashes [limit]   most recently seen infohashes
  infohash <hex>       one infohash with its peers and trackers
  metadata [limit]     most recently downloaded metadata
  search <query>       metadata whose name contains the query
  start                start crawling
  stop                 stop crawling
  exit                 leave the console";

/// Runs the console until `exit` or end of input. The crawler keeps running
/// in the background; `start`/`stop` only toggle crawling.
///
/// # Errors
///
/// Will return `Err` when stdin or stdout fail.
pub async fn run(crawler: Arc<Crawler>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("swarmscan console; type `help` for commands");
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(Command::Exit) => break,
            Ok(command) => execute(&crawler, command).await,
            Err(ParseError::Empty) => {}
            Err(ParseError::Unknown(verb)) => println!("unknown command {verb:?}; type `help`"),
            Err(ParseError::BadArgument(argument)) => println!("bad argument {argument:?}"),
        }
        prompt()?;
    }

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("> ");
    std::io::stdout().flush()
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("could not render the record: {e}"),
    }
}

async fn execute(crawler: &Arc<Crawler>, command: Command) {
    let Some(database) = crawler.database().await else {
        println!("the crawler is not initialized");
        return;
    };

    match command {
        Command::Help => println!("{HELP}"),

        Command::Stats => {
            for (key, value) in crawler.statistics().await {
                println!("{key} = {value}");
            }
        }

        Command::Nodes { limit } => {
            let options = NodeQueryOptions {
                limit: Some(limit),
                order_by: Some(NodeOrderBy::LastSeen),
                order_desc: true,
                ..Default::default()
            };
            match database.get_nodes(&options).await {
                Ok(nodes) => {
                    for node in nodes {
                        print_json(&node);
                    }
                }
                Err(e) => println!("query failed: {e}"),
            }
        }

        Command::Node { id } => match database.get_node(&id).await {
            Ok(Some(node)) => print_json(&node),
            Ok(None) => println!("no node {id}"),
            Err(e) => println!("query failed: {e}"),
        },

        Command::Infohashes { limit } => {
            let options = InfoHashQueryOptions {
                limit: Some(limit),
                order_by: Some(InfoHashOrderBy::LastSeen),
                order_desc: true,
                ..Default::default()
            };
            match database.get_infohashes(&options).await {
                Ok(records) => {
                    for record in records {
                        print_json(&record);
                    }
                }
                Err(e) => println!("query failed: {e}"),
            }
        }

        Command::Infohash { info_hash } => {
            match database.get_infohash(&info_hash).await {
                Ok(Some(record)) => print_json(&record),
                Ok(None) => {
                    println!("no infohash {info_hash}");
                    return;
                }
                Err(e) => {
                    println!("query failed: {e}");
                    return;
                }
            }
            if let Ok(Some(metadata)) = database.get_metadata(&info_hash).await {
                print_json(&metadata);
            }
            if let Ok(peers) = database.get_peers(&info_hash, DEFAULT_LIST_LIMIT).await {
                for peer in peers {
                    print_json(&peer);
                }
            }
            if let Ok(trackers) = database.get_trackers(&info_hash).await {
                for tracker in trackers {
                    print_json(&tracker);
                }
            }
        }

        Command::Metadata { limit } => {
            let options = MetadataQueryOptions {
                limit: Some(limit),
                order_by: Some(MetadataOrderBy::DownloadTime),
                order_desc: true,
                ..Default::default()
            };
            match database.get_metadata_list(&options).await {
                Ok(records) => {
                    for record in records {
                        print_json(&record);
                    }
                }
                Err(e) => println!("query failed: {e}"),
            }
        }

        Command::Search { query } => {
            let options = MetadataQueryOptions {
                name_contains: Some(query),
                order_by: Some(MetadataOrderBy::DownloadTime),
                order_desc: true,
                limit: Some(DEFAULT_LIST_LIMIT),
                ..Default::default()
            };
            match database.get_metadata_list(&options).await {
                Ok(records) if records.is_empty() => println!("no matches"),
                Ok(records) => {
                    for record in records {
                        print_json(&record);
                    }
                }
                Err(e) => println!("query failed: {e}"),
            }
        }

        Command::Start => match crawler.start_crawling().await {
            Ok(()) => println!("crawling"),
            Err(e) => println!("could not start crawling: {e}"),
        },

        Command::Stop => match crawler.stop_crawling().await {
            Ok(()) => println!("not crawling"),
            Err(e) => println!("could not stop crawling: {e}"),
        },

        Command::Exit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, Command, ParseError, DEFAULT_LIST_LIMIT};

    #[test]
    fn it_should_parse_bare_commands() {
        assert_eq!(parse_command("help"), Ok(Command::Help));
        assert_eq!(parse_command("stats"), Ok(Command::Stats));
        assert_eq!(parse_command("exit"), Ok(Command::Exit));
    }

    #[test]
    fn list_commands_should_default_their_limit() {
        assert_eq!(parse_command("nodes"), Ok(Command::Nodes { limit: DEFAULT_LIST_LIMIT }));
        assert_eq!(parse_command("nodes 5"), Ok(Command::Nodes { limit: 5 }));
    }

    #[test]
    fn a_node_command_should_require_a_valid_id() {
        assert!(parse_command("node").is_err());
        assert!(parse_command("node nothex").is_err());
        assert!(parse_command(&format!("node {}", "a".repeat(40))).is_ok());
    }

    #[test]
    fn a_search_command_should_join_its_terms() {
        assert_eq!(
            parse_command("search ubuntu server iso"),
            Ok(Command::Search {
                query: "ubuntu server iso".to_string()
            })
        );
        assert!(parse_command("search").is_err());
    }

    #[test]
    fn unknown_verbs_and_blank_lines_should_be_distinguished() {
        assert_eq!(parse_command(""), Err(ParseError::Empty));
        assert_eq!(parse_command("frobnicate"), Err(ParseError::Unknown("frobnicate".to_string())));
    }

    #[test]
    fn a_non_numeric_limit_should_be_a_bad_argument() {
        assert_eq!(parse_command("nodes many"), Err(ParseError::BadArgument("many".to_string())));
    }
}
