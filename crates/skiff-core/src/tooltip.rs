use crate::date::UserDateFormatter;
use crate::locale::{LocaleTable, DEFAULT_TABLE};
use crate::path::Path;

/// Browser tooltip: absolute path, size and modification date on three lines.
pub struct PathTooltipService<'a> {
    formatter: &'a dyn UserDateFormatter,
    locale: &'a LocaleTable,
}

impl<'a> PathTooltipService<'a> {
    pub fn new(formatter: &'a dyn UserDateFormatter, locale: &'a LocaleTable) -> Self {
        Self { formatter, locale }
    }

    pub fn tooltip(&self, file: &Path) -> String {
        let attributes = file.attributes();
        let size = if attributes.size < 0 {
            "--".to_string()
        } else {
            format_size(attributes.size)
        };
        let date = if attributes.modification_date < 0 {
            self.locale.localized("Unknown", DEFAULT_TABLE)
        } else {
            self.formatter.short_format(attributes.modification_date)
        };
        format!("{}\n{}\n{}", file.absolute(), size, date)
    }
}

/// Decimal units, as shown next to file sizes in the browser.
pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = u;
    }
    format!("{:.1} {}", value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::ChronoDateFormatter;
    use crate::path::{PathAttributes, PathType};

    #[test]
    fn unknown_size_and_date() {
        let formatter = ChronoDateFormatter::default();
        let locale = LocaleTable::new();
        let service = PathTooltipService::new(&formatter, &locale);
        assert_eq!(
            service.tooltip(&Path::new("/p", PathType::FILE)),
            "/p\n--\nUnknown"
        );
    }

    #[test]
    fn known_size_and_date() {
        let formatter = ChronoDateFormatter::default();
        let locale = LocaleTable::new();
        let service = PathTooltipService::new(&formatter, &locale);
        let attributes = PathAttributes {
            size: 1_500,
            modification_date: 1_700_000_000_000,
            ..PathAttributes::default()
        };
        let file = Path::new("/a.bin", PathType::FILE).with_attributes(attributes);
        assert_eq!(service.tooltip(&file), "/a.bin\n1.5 KB\n11/14/23, 10:13 PM");
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(999), "999 B");
        assert_eq!(format_size(2_500_000), "2.5 MB");
    }
}
