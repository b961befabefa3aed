//! Одноразовый HTTP-сервер на `std::net` для тестов адаптеров.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Запрос, как его увидел сервер.
pub(crate) struct Captured {
    pub(crate) request_line: String,
    pub(crate) headers: Vec<String>,
    pub(crate) body: String,
}

impl Captured {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|h| {
            let (k, v) = h.split_once(':')?;
            k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }
}

/// Принимает одно соединение, ждёт `delay` и отвечает `status` + `body`.
/// Возвращает базовый URL и поток, отдающий захваченный запрос.
pub(crate) fn serve_once(
    status: &str,
    extra_headers: &[&str],
    body: &str,
    delay: Duration,
) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let response = {
        let mut r = format!("HTTP/1.1 {status}\r\n");
        for h in extra_headers {
            r.push_str(h);
            r.push_str("\r\n");
        }
        r.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        r
    };

    let h = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end().to_string();
            if line.is_empty() {
                break;
            }
            headers.push(line);
        }

        let captured_len = headers
            .iter()
            .find_map(|h| {
                let (k, v) = h.split_once(':')?;
                k.eq_ignore_ascii_case("content-length")
                    .then(|| v.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        let mut buf = vec![0u8; captured_len];
        reader.read_exact(&mut buf).unwrap();

        thread::sleep(delay);
        let mut stream = reader.into_inner();
        // клиент мог уже уйти по таймауту
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();

        Captured {
            request_line: request_line.trim_end().to_string(),
            headers,
            body: String::from_utf8_lossy(&buf).to_string(),
        }
    });

    (url, h)
}
