//! Workload script parser and reply formatting
//!
//! One command per line, whitespace separated, keyword case-insensitive.
//! Blank lines and lines starting with `#` are skipped. Id lists are
//! comma separated.

use std::fmt;

/// Parsed script command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// BUDGET <bytes>
    Budget(u64),
    /// PUT_IMAGE <id> <bytes> [delay_ms]
    PutImage {
        image_id: String,
        bytes: u64,
        delay_ms: Option<u64>,
    },
    /// FAIL_IMAGE <id> [delay_ms]: a load that rejects
    FailImage { image_id: String, delay_ms: Option<u64> },
    /// PUT_VOLUME <id> <image_id,...> [referenced_volume_id]
    PutVolume {
        volume_id: String,
        image_ids: Vec<String>,
        referenced_volume_id: Option<String>,
    },
    /// PUT_GEOMETRY <id> <bytes>
    PutGeometry { geometry_id: String, bytes: u64 },
    /// GET_IMAGE <id>
    GetImage(String),
    /// GET_VOLUME <id>
    GetVolume(String),
    /// GET_GEOMETRY <id>
    GetGeometry(String),
    /// IS_LOADED <id>
    IsLoaded(String),
    /// CACHEABLE <bytes>
    Cacheable(u64),
    /// REMOVE_IMAGE <id>
    RemoveImage(String),
    /// REMOVE_VOLUME <id>
    RemoveVolume(String),
    /// REMOVE_GEOMETRY <id>
    RemoveGeometry(String),
    /// RECLAIM <bytes> [protected_id,...]
    Reclaim {
        bytes: u64,
        protected: Option<Vec<String>>,
    },
    /// FIND_VOLUME <image_id>
    FindVolume(String),
    /// FIND_IMAGE <image_id>
    FindImage(String),
    /// VOLUMES [referenced_volume_id]
    Volumes(Option<String>),
    /// PURGE
    Purge,
    /// PURGE_VOLUMES
    PurgeVolumes,
    /// WAIT: settle every queued load
    Wait,
    /// SIZE
    Size,
    /// STATS
    Stats,
    /// STATS RESET: zero the counters, leaving entries alone
    ResetStats,
}

/// Reply to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Success, with an optional payload
    Ok(Option<String>),
    /// Command was rejected
    Error(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok(None)
    }

    pub fn value(value: impl fmt::Display) -> Self {
        Reply::Ok(Some(value.to_string()))
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Reply::Error(message.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok(None) => write!(f, "OK"),
            Reply::Ok(Some(value)) => write!(f, "OK {}", value),
            Reply::Error(message) => write!(f, "ERR {}", message),
        }
    }
}

impl Command {
    /// Parse one script line; `Ok(None)` for blanks and comments
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut parts = line.split_whitespace();
        let keyword = parts.next().unwrap_or_default().to_uppercase();
        let args: Vec<&str> = parts.collect();

        let command = match keyword.as_str() {
            "BUDGET" => {
                arity(&keyword, &args, 1, 1)?;
                Command::Budget(number(&args[0])?)
            }
            "PUT_IMAGE" => {
                arity(&keyword, &args, 2, 3)?;
                Command::PutImage {
                    image_id: args[0].to_string(),
                    bytes: number(&args[1])?,
                    delay_ms: args.get(2).map(|s| number(s)).transpose()?,
                }
            }
            "FAIL_IMAGE" => {
                arity(&keyword, &args, 1, 2)?;
                Command::FailImage {
                    image_id: args[0].to_string(),
                    delay_ms: args.get(1).map(|s| number(s)).transpose()?,
                }
            }
            "PUT_VOLUME" => {
                arity(&keyword, &args, 2, 3)?;
                Command::PutVolume {
                    volume_id: args[0].to_string(),
                    image_ids: id_list(args[1]),
                    referenced_volume_id: args.get(2).map(|s| s.to_string()),
                }
            }
            "PUT_GEOMETRY" => {
                arity(&keyword, &args, 2, 2)?;
                Command::PutGeometry {
                    geometry_id: args[0].to_string(),
                    bytes: number(&args[1])?,
                }
            }
            "GET_IMAGE" => Command::GetImage(single(&keyword, &args)?),
            "GET_VOLUME" => Command::GetVolume(single(&keyword, &args)?),
            "GET_GEOMETRY" => Command::GetGeometry(single(&keyword, &args)?),
            "IS_LOADED" => Command::IsLoaded(single(&keyword, &args)?),
            "CACHEABLE" => {
                arity(&keyword, &args, 1, 1)?;
                Command::Cacheable(number(&args[0])?)
            }
            "REMOVE_IMAGE" => Command::RemoveImage(single(&keyword, &args)?),
            "REMOVE_VOLUME" => Command::RemoveVolume(single(&keyword, &args)?),
            "REMOVE_GEOMETRY" => Command::RemoveGeometry(single(&keyword, &args)?),
            "RECLAIM" => {
                arity(&keyword, &args, 1, 2)?;
                Command::Reclaim {
                    bytes: number(&args[0])?,
                    protected: args.get(1).map(|s| id_list(s)),
                }
            }
            "FIND_VOLUME" => Command::FindVolume(single(&keyword, &args)?),
            "FIND_IMAGE" => Command::FindImage(single(&keyword, &args)?),
            "VOLUMES" => {
                arity(&keyword, &args, 0, 1)?;
                Command::Volumes(args.first().map(|s| s.to_string()))
            }
            "PURGE" => bare(&keyword, &args, Command::Purge)?,
            "PURGE_VOLUMES" => bare(&keyword, &args, Command::PurgeVolumes)?,
            "WAIT" => bare(&keyword, &args, Command::Wait)?,
            "SIZE" => bare(&keyword, &args, Command::Size)?,
            "STATS" => {
                arity(&keyword, &args, 0, 1)?;
                match args.first() {
                    None => Command::Stats,
                    Some(arg) if arg.eq_ignore_ascii_case("RESET") => Command::ResetStats,
                    Some(arg) => return Err(format!("unknown STATS subcommand '{}'", arg)),
                }
            }
            _ => return Err(format!("unknown command '{}'", keyword)),
        };

        Ok(Some(command))
    }
}

fn arity(keyword: &str, args: &[&str], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        return Err(format!(
            "wrong number of arguments for '{}' command",
            keyword.to_lowercase()
        ));
    }
    Ok(())
}

fn single(keyword: &str, args: &[&str]) -> Result<String, String> {
    arity(keyword, args, 1, 1)?;
    Ok(args[0].to_string())
}

fn bare(keyword: &str, args: &[&str], command: Command) -> Result<Command, String> {
    arity(keyword, args, 0, 0)?;
    Ok(command)
}

fn number<T: std::str::FromStr>(arg: &str) -> Result<T, String> {
    arg.parse()
        .map_err(|_| format!("value is not an integer or out of range: '{}'", arg))
}

fn id_list(arg: &str) -> Vec<String> {
    arg.split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
