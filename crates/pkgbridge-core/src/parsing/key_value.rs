/// Ordered `Key: value` pairs from a manifest-style listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyValues {
    pairs: Vec<(String, String)>,
}

impl KeyValues {
    /// First non-empty value recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(name, value)| name == key && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }

    pub fn get_owned(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_owned)
    }

    /// Multi-line value split back into its lines.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Parses `Key: value` lines. Indented lines that are not pairs of their own
/// continue the previous value, one line per entry.
pub fn key_value_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> KeyValues {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut continuing = false;

    for raw in lines {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continuing = false;
            continue;
        }

        if let Some((key, value)) = split_pair(line) {
            pairs.push((key.to_string(), value.to_string()));
            continuing = true;
            continue;
        }

        let indented = line.starts_with(char::is_whitespace);
        match pairs.last_mut() {
            Some((_, value)) if indented && continuing => {
                if !value.is_empty() {
                    value.push('\n');
                }
                value.push_str(line.trim());
            }
            _ => continuing = false,
        }
    }

    KeyValues { pairs }
}

fn split_pair(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    // `https://…` and similar are values, not keys.
    if !value.is_empty() && !value.starts_with(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::key_value_lines;

    const SHOW_FIXTURE: &str = "\
Found Mozilla Firefox [Mozilla.Firefox]
Version: 119.0
Publisher: Mozilla
Homepage: https://www.mozilla.org/firefox/
Tags:
  browser
  gecko
Installer:
  Installer Type: exe
  Installer Url: https://download.mozilla.org/?product=firefox-119.0
";

    #[test]
    fn reads_pairs_and_ignores_banner() {
        let values = key_value_lines(SHOW_FIXTURE.lines());
        assert_eq!(values.get("Version"), Some("119.0"));
        assert_eq!(values.get("Publisher"), Some("Mozilla"));
        assert_eq!(values.get("Homepage"), Some("https://www.mozilla.org/firefox/"));
        assert_eq!(values.get("Found Mozilla Firefox [Mozilla.Firefox]"), None);
    }

    #[test]
    fn indented_lines_continue_the_previous_key() {
        let values = key_value_lines(SHOW_FIXTURE.lines());
        assert_eq!(values.get_list("Tags"), vec!["browser", "gecko"]);
    }

    #[test]
    fn nested_pairs_are_keys_of_their_own() {
        let values = key_value_lines(SHOW_FIXTURE.lines());
        assert_eq!(values.get("Installer Type"), Some("exe"));
        assert_eq!(
            values.get("Installer Url"),
            Some("https://download.mozilla.org/?product=firefox-119.0")
        );
        assert_eq!(values.get("Installer"), None);
    }

    #[test]
    fn padded_format_list_keys_are_trimmed() {
        let values = key_value_lines(
            [
                "Name                       : 7Zip4Powershell",
                "Description                : Powershell module for creating and extracting",
                "                             7-Zip archives",
            ]
            .into_iter(),
        );
        assert_eq!(values.get("Name"), Some("7Zip4Powershell"));
        assert_eq!(
            values.get("Description"),
            Some("Powershell module for creating and extracting\n7-Zip archives")
        );
    }
}
