use crate::error::ProtocolError;

/// Команда управляющего TCP-протокола (одна строка на соединение).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CHECK` / `CHECK WAIT`
    Check { wait: bool },
    Status,
    /// `GET {id | casa}`
    Get { query: String },
    List,
}

/// Парсит строку вида "CHECK WAIT" или "GET USD:blue".
/// Имя команды регистронезависимо, аргументы сохраняются как есть.
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::EmptyCommand);
    }

    let mut parts = line.split_whitespace();
    let name = parts.next().ok_or(ProtocolError::EmptyCommand)?;

    let cmd = match name.to_ascii_uppercase().as_str() {
        "CHECK" => match parts.next() {
            None => Command::Check { wait: false },
            Some(flag) if flag.eq_ignore_ascii_case("WAIT") => Command::Check { wait: true },
            Some(other) => return Err(ProtocolError::UnexpectedArgument(other.to_string())),
        },
        "STATUS" => Command::Status,
        "LIST" => Command::List,
        "GET" => {
            let query = parts.next().ok_or(ProtocolError::MissingArgument("GET"))?;
            Command::Get {
                query: query.to_string(),
            }
        }
        _ => return Err(ProtocolError::UnknownCommand(name.to_string())),
    };

    match parts.next() {
        Some(extra) => Err(ProtocolError::UnexpectedArgument(extra.to_string())),
        None => Ok(cmd),
    }
}

pub fn format_command(cmd: &Command) -> String {
    match cmd {
        Command::Check { wait: false } => "CHECK".to_string(),
        Command::Check { wait: true } => "CHECK WAIT".to_string(),
        Command::Status => "STATUS".to_string(),
        Command::Get { query } => format!("GET {query}"),
        Command::List => "LIST".to_string(),
    }
}

/// Ответ сервера: `OK ...` или `ERR ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(String),
    Err(String),
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Reply::Ok(body.into())
    }

    pub fn err(body: impl Into<String>) -> Self {
        Reply::Err(body.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    pub fn body(&self) -> &str {
        match self {
            Reply::Ok(b) | Reply::Err(b) => b,
        }
    }

    /// Строка для отправки, без завершающего `\n`.
    pub fn format(&self) -> String {
        let (tag, body) = match self {
            Reply::Ok(b) => ("OK", b),
            Reply::Err(b) => ("ERR", b),
        };
        // перевод строки внутри тела сломал бы построчный протокол
        let body = body.replace(['\r', '\n'], " ");
        if body.is_empty() {
            tag.to_string()
        } else {
            format!("{tag} {body}")
        }
    }
}

pub fn parse_reply(line: &str) -> Result<Reply, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (tag, body) = match line.split_once(' ') {
        Some((tag, body)) => (tag, body),
        None => (line, ""),
    };

    match tag {
        "OK" => Ok(Reply::Ok(body.to_string())),
        "ERR" => Ok(Reply::Err(body.to_string())),
        _ => Err(ProtocolError::MalformedReply(line.to_string())),
    }
}
