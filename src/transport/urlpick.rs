// Round-robin URL failover for a single peer that may advertise more
// than one reachable address.
//
// Grounded on `original_source/utils/api/rafthttp/urlpick.go`: pick the
// currently selected URL, and on a reported failure advance to the next
// one in the list (wrapping around), so a multi-homed peer degrades to
// its other address instead of going permanently unreachable.

use parking_lot::Mutex;

struct Inner {
    urls: Vec<String>,
    picked: usize,
}

pub struct UrlPicker {
    inner: Mutex<Inner>,
}

impl UrlPicker {
    pub fn new(urls: Vec<String>) -> Self {
        assert!(!urls.is_empty(), "url picker needs at least one url");
        Self { inner: Mutex::new(Inner { urls, picked: 0 }) }
    }

    pub fn update(&self, urls: Vec<String>) {
        let mut inner = self.inner.lock();
        inner.urls = urls;
        inner.picked = 0;
    }

    pub fn pick(&self) -> String {
        let inner = self.inner.lock();
        inner.urls[inner.picked].clone()
    }

    /// Mark `url` unreachable; if it is still the picked one, advance to
    /// the next candidate.
    pub fn unreachable(&self, url: &str) {
        let mut inner = self.inner.lock();
        if inner.urls[inner.picked] == url {
            inner.picked = (inner.picked + 1) % inner.urls.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_to_next_url_on_failure_and_wraps() {
        let picker = UrlPicker::new(vec!["a".into(), "b".into()]);
        assert_eq!(picker.pick(), "a");
        picker.unreachable("a");
        assert_eq!(picker.pick(), "b");
        picker.unreachable("b");
        assert_eq!(picker.pick(), "a");
    }

    #[test]
    fn ignores_failure_report_for_a_url_that_is_no_longer_picked() {
        let picker = UrlPicker::new(vec!["a".into(), "b".into()]);
        picker.unreachable("a");
        assert_eq!(picker.pick(), "b");
        picker.unreachable("a");
        assert_eq!(picker.pick(), "b");
    }
}
