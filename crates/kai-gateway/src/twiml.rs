//! TwiML answering an incoming call with a bidirectional media stream.

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// WebSocket URL of the media-stream endpoint for `host`.
///
/// `host` may be a bare host (`example.ngrok.app`) or a full URL; `http(s)`
/// schemes are mapped to `ws(s)`.
pub fn stream_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    let base = if let Some(rest) = host.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = host.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if host.starts_with("wss://") || host.starts_with("ws://") {
        host.to_string()
    } else {
        format!("wss://{host}")
    };
    format!("{base}/media-stream")
}

/// `<Connect><Stream>` response passing the caller number as a stream parameter.
pub fn connect_stream(stream_url: &str, caller: Option<&str>) -> String {
    let parameter = caller
        .filter(|c| !c.is_empty())
        .map(|c| {
            format!(
                "\n      <Parameter name=\"caller\" value=\"{}\" />",
                escape_xml(c)
            )
        })
        .unwrap_or_default();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Response>\n  \
           <Connect>\n    \
             <Stream url=\"{}\">{parameter}\n    </Stream>\n  \
           </Connect>\n\
         </Response>\n",
        escape_xml(stream_url)
    )
}
