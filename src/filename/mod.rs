//! Encoding and decoding of backup metadata in file names.
//!
//! Backups carry their whole metadata in the file name: server name,
//! database name, creation time and extension, arranged by a
//! configurable template. The creation time is rendered with a
//! strftime-style date format and recovered later by compiling that
//! same format into an extraction regex.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use derive_more::Display;
use regex::Regex;

/// Default template for database backup names.
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{databasename}-{servername}-{datetime}.{extension}";

/// Default template for media backup names.
pub const DEFAULT_MEDIA_FILENAME_TEMPLATE: &str = "{servername}-{datetime}-media.{extension}";

/// Default date format embedded into backup names.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Name token marking media backups.
pub const MEDIA_MARKER: &str = "media";

/// Wildcard substituted for the datetime when generating a filter
/// pattern instead of an exact name.
const DATETIME_WILDCARD: &str = "*";

/// Classification of a backup artifact.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Database dump.
    #[display("db")]
    Db,
    /// Media file-tree archive.
    #[display("media")]
    Media,
}

/// Named parameters available to a filename [Template].
#[derive(Debug, Clone, Copy)]
pub struct FilenameParams<'a> {
    pub extension: &'a str,
    pub database_name: &'a str,
    pub server_name: &'a str,
    pub content_type: ContentType,
    pub datetime: &'a str,
}

/// A filename template: either a format string with named placeholders
/// or a caller-supplied function producing the name directly.
pub enum Template {
    /// Format string with `{databasename}`, `{servername}`, `{datetime}`,
    /// `{extension}` and `{content_type}` placeholders.
    Format(String),
    /// Escape hatch bypassing templating entirely.
    Callable(Box<dyn Fn(&FilenameParams<'_>) -> String + Send + Sync>),
}

impl Template {
    fn render(&self, params: &FilenameParams<'_>) -> String {
        match self {
            Self::Format(format) => format
                .replace("{databasename}", params.database_name)
                .replace("{servername}", params.server_name)
                .replace("{datetime}", params.datetime)
                .replace("{extension}", params.extension)
                .replace("{content_type}", &params.content_type.to_string()),
            Self::Callable(callable) => callable(params),
        }
    }
}

impl From<&str> for Template {
    fn from(format: &str) -> Self {
        Self::Format(format.to_string())
    }
}

impl From<String> for Template {
    fn from(format: String) -> Self {
        Self::Format(format)
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(format) => f.debug_tuple("Format").field(format).finish(),
            Self::Callable(_) => f.debug_tuple("Callable").finish(),
        }
    }
}

/// Generates backup names and recovers the embedded creation time.
#[derive(Debug)]
pub struct FilenameCodec {
    template: Template,
    media_template: Template,
    date_format: String,
    date_regex: Regex,
}

impl Default for FilenameCodec {
    fn default() -> Self {
        Self::new(
            DEFAULT_FILENAME_TEMPLATE.into(),
            DEFAULT_MEDIA_FILENAME_TEMPLATE.into(),
            DEFAULT_DATE_FORMAT,
        )
    }
}

impl FilenameCodec {
    /// Create a codec from the two templates and the date format.
    pub fn new(template: Template, media_template: Template, date_format: &str) -> Self {
        let date_regex = Regex::new(&date_format_to_regex(date_format))
            .expect("compiled date format pattern should be a valid regex");

        Self {
            template,
            media_template,
            date_format: date_format.to_string(),
            date_regex,
        }
    }

    /// Generate a backup name stamped with the current local time.
    pub fn generate(
        &self,
        extension: &str,
        database_name: &str,
        server_name: &str,
        content_type: ContentType,
    ) -> String {
        self.generate_at(
            extension,
            database_name,
            server_name,
            content_type,
            Local::now(),
        )
    }

    /// Generate a backup name stamped with an explicit instant.
    pub fn generate_at(
        &self,
        extension: &str,
        database_name: &str,
        server_name: &str,
        content_type: ContentType,
        at: DateTime<Local>,
    ) -> String {
        let datetime = at.format(&self.date_format).to_string();
        self.render(extension, database_name, server_name, content_type, &datetime)
    }

    /// Generate a filter pattern with a `*` wildcard in place of the
    /// datetime.
    pub fn pattern(
        &self,
        extension: &str,
        database_name: &str,
        server_name: &str,
        content_type: ContentType,
    ) -> String {
        self.render(
            extension,
            database_name,
            server_name,
            content_type,
            DATETIME_WILDCARD,
        )
    }

    fn render(
        &self,
        extension: &str,
        database_name: &str,
        server_name: &str,
        content_type: ContentType,
        datetime: &str,
    ) -> String {
        let database_name = sanitize_database_name(database_name);
        let params = FilenameParams {
            extension,
            database_name,
            server_name,
            content_type,
            datetime,
        };

        let template = match content_type {
            ContentType::Db => &self.template,
            ContentType::Media => &self.media_template,
        };

        normalize_separators(&template.render(&params))
    }

    /// Locate and extract the datetime substring embedded in `name`.
    ///
    /// Returns [None] when the name carries no substring matching the
    /// date format. Such files are not backup artifacts.
    pub fn parse_date_string<'a>(&self, name: &'a str) -> Option<&'a str> {
        self.date_regex
            .captures(name)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str())
    }

    /// Decode the creation time embedded in `name`.
    ///
    /// Date-only formats resolve to midnight. Fails silently with
    /// [None] so callers exclude undecodable names from listings.
    pub fn parse_date(&self, name: &str) -> Option<NaiveDateTime> {
        let date_string = self.parse_date_string(name)?;

        NaiveDateTime::parse_from_str(date_string, &self.date_format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(date_string, &self.date_format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
    }

    /// The configured date format.
    pub fn date_format(&self) -> &str {
        &self.date_format
    }
}

/// Strip path components and the first `.`-suffix from a database name.
///
/// SQLite database names are file paths; only the bare stem belongs in
/// a backup name.
pub(crate) fn sanitize_database_name(name: &str) -> &str {
    let basename = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    basename.split('.').next().unwrap_or(basename)
}

/// Collapse runs of `-` left behind by empty template fields and strip
/// a leading `-`.
fn normalize_separators(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut previous_dash = false;
    for c in name.chars() {
        if c == '-' {
            if previous_dash {
                continue;
            }
            previous_dash = true;
        } else {
            previous_dash = false;
        }
        normalized.push(c);
    }

    normalized.trim_start_matches('-').to_string()
}

/// Compile a strftime-style date format into an extraction regex.
///
/// Every known directive maps to a fixed-width or word-class fragment,
/// literal characters are matched literally and the whole pattern is
/// wrapped in a single capture group. The resulting regex locates the
/// embedded timestamp regardless of surrounding name parts.
fn date_format_to_regex(date_format: &str) -> String {
    let mut pattern = String::from("(");

    let mut chars = date_format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            pattern.push_str(&regex::escape(&c.to_string()));
            continue;
        }

        match chars.next() {
            Some('a' | 'A' | 'b' | 'B') => pattern.push_str("[A-Z][a-z]+"),
            Some('w') => pattern.push_str(r"\d"),
            Some('d' | 'm' | 'y' | 'H' | 'I' | 'M' | 'S' | 'U' | 'W') => {
                pattern.push_str(r"\d{2}")
            }
            Some('Y') => pattern.push_str(r"\d{4}"),
            Some('j') => pattern.push_str(r"\d{3}"),
            Some('f') => pattern.push_str(r"\d{1,9}"),
            Some(other) => {
                // Unknown directive: match it literally.
                pattern.push('%');
                pattern.push_str(&regex::escape(&other.to_string()));
            }
            None => pattern.push('%'),
        }
    }

    pattern.push(')');
    pattern
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed_instant() -> DateTime<Local> {
        Local.with_ymd_and_hms(2015, 2, 8, 13, 37, 42).unwrap()
    }

    #[test]
    fn generates_name_from_default_template() {
        let codec = FilenameCodec::default();
        let name = codec.generate_at("psql", "app", "web1", ContentType::Db, fixed_instant());

        assert_eq!(name, "app-web1-2015-02-08-133742.psql");
    }

    #[test]
    fn media_names_carry_the_media_marker() {
        let codec = FilenameCodec::default();
        let name = codec.generate_at("tar", "", "web1", ContentType::Media, fixed_instant());

        assert_eq!(name, "web1-2015-02-08-133742-media.tar");
        assert!(name.contains(MEDIA_MARKER));
    }

    #[test]
    fn database_path_is_reduced_to_its_stem() {
        let codec = FilenameCodec::default();
        let name = codec.generate_at(
            "dump",
            "/var/lib/app/production.sqlite3",
            "web1",
            ContentType::Db,
            fixed_instant(),
        );

        assert_eq!(name, "production-web1-2015-02-08-133742.dump");
    }

    #[test]
    fn empty_fields_leave_no_double_or_leading_separators() {
        let codec = FilenameCodec::default();
        let name = codec.generate_at("psql", "", "web1", ContentType::Db, fixed_instant());

        assert!(!name.starts_with('-'));
        assert!(!name.contains("--"));
        assert_eq!(name, "web1-2015-02-08-133742.psql");
    }

    #[test]
    fn callable_template_bypasses_formatting() {
        let codec = FilenameCodec::new(
            Template::Callable(Box::new(|params: &FilenameParams<'_>| {
                format!("custom-{}.{}", params.datetime, params.extension)
            })),
            DEFAULT_MEDIA_FILENAME_TEMPLATE.into(),
            DEFAULT_DATE_FORMAT,
        );

        let name = codec.generate_at("psql", "app", "web1", ContentType::Db, fixed_instant());
        assert_eq!(name, "custom-2015-02-08-133742.psql");
    }

    #[test]
    fn pattern_substitutes_wildcard_for_datetime() {
        let codec = FilenameCodec::default();
        let pattern = codec.pattern("psql", "app", "web1", ContentType::Db);

        assert_eq!(pattern, "app-web1-*.psql");
    }

    #[test]
    fn round_trips_generated_names() {
        for date_format in ["%Y-%m-%d-%H%M%S", "%Y%m%d%H%M%S", "%d-%m-%Y", "%Y-%j-%H%M"] {
            let codec = FilenameCodec::new(
                DEFAULT_FILENAME_TEMPLATE.into(),
                DEFAULT_MEDIA_FILENAME_TEMPLATE.into(),
                date_format,
            );
            let at = fixed_instant();
            let name = codec.generate_at("psql", "app", "web1", ContentType::Db, at);

            let expected = NaiveDateTime::parse_from_str(
                &at.format(date_format).to_string(),
                date_format,
            )
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(&at.format(date_format).to_string(), date_format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
            .unwrap();

            assert_eq!(codec.parse_date(&name), Some(expected), "format {date_format}");
        }
    }

    #[test]
    fn extracts_date_regardless_of_surrounding_parts() {
        let codec = FilenameCodec::default();

        assert_eq!(
            codec.parse_date_string("prefix-app-web1-2015-02-08-133742.psql.gz.gpg"),
            Some("2015-02-08-133742")
        );
    }

    #[test]
    fn undecodable_names_parse_to_none() {
        let codec = FilenameCodec::default();

        assert_eq!(codec.parse_date("README.md"), None);
        assert_eq!(codec.parse_date("app-web1.psql"), None);
    }

    #[test]
    fn word_directives_compile_to_word_classes() {
        let codec = FilenameCodec::new(
            DEFAULT_FILENAME_TEMPLATE.into(),
            DEFAULT_MEDIA_FILENAME_TEMPLATE.into(),
            "%a-%d-%b-%Y",
        );
        let at = fixed_instant();
        let name = codec.generate_at("psql", "app", "web1", ContentType::Db, at);

        assert_eq!(codec.parse_date_string(&name), Some("Sun-08-Feb-2015"));
        assert_eq!(
            codec.parse_date(&name),
            NaiveDate::from_ymd_opt(2015, 2, 8).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
    }

    #[test]
    fn literal_regex_metacharacters_are_escaped() {
        let codec = FilenameCodec::new(
            DEFAULT_FILENAME_TEMPLATE.into(),
            DEFAULT_MEDIA_FILENAME_TEMPLATE.into(),
            "%Y.%m.%d",
        );

        // A '.' in the format must not match arbitrary characters.
        assert_eq!(codec.parse_date_string("app-web1-2015x02x08.psql"), None);
        assert_eq!(
            codec.parse_date_string("app-web1-2015.02.08.psql"),
            Some("2015.02.08")
        );
    }
}
