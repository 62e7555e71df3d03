/// Reduce a request target to its base host, the key used by the blacklist.
///
/// Everything from the first `:` is dropped (port). When the remainder has
/// two or more dots, only the last two labels are kept, so
/// `a.b.example.com:443` becomes `example.com`. Targets with fewer dots are
/// returned unchanged apart from the port.
///
/// This is a naive approximation of the registrable domain, not a public
/// suffix lookup: `news.bbc.co.uk` normalizes to `co.uk`.
///
/// # Arguments
/// * `target` - Host, optionally followed by `:port`
///
/// # Returns
/// The base host as a borrowed slice of `target`
pub fn base_host(target: &str) -> &str {
    let host = strip_port(target);

    let mut dots = host.rmatch_indices('.').map(|(idx, _)| idx);
    match (dots.next(), dots.next()) {
        (Some(_), Some(second_to_last)) => &host[second_to_last + 1..],
        _ => host,
    }
}

/// Host of a CONNECT request: the authority up to the first `:`.
pub fn connect_target(authority: &str) -> &str {
    strip_port(authority)
}

/// Host of an absolute-form request URI: its third `/`-delimited segment.
///
/// `http://www.example.com:8080/index.html` yields `www.example.com:8080`.
/// Origin-form targets (`/index.html`) have no such segment and yield `None`.
pub fn http_target(uri: &str) -> Option<&str> {
    uri.split('/').nth(2).filter(|segment| !segment.is_empty())
}

fn strip_port(target: &str) -> &str {
    match target.split_once(':') {
        Some((host, _)) => host,
        None => target,
    }
}
