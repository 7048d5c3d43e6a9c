/// A named timezone offered on the configuration form.
///
/// Names are IANA zone identifiers so the clock-sync component can resolve
/// them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timezone {
    pub name: &'static str,
}

/// The fixed set offered by the configuration form, roughly one zone per
/// UTC offset plus the common laboratory locations.
pub const TIMEZONES: &[Timezone] = &[
    Timezone { name: "UTC" },
    Timezone { name: "Europe/London" },
    Timezone { name: "Europe/Berlin" },
    Timezone { name: "Europe/Paris" },
    Timezone { name: "Europe/Copenhagen" },
    Timezone { name: "Europe/Madrid" },
    Timezone { name: "Europe/Rome" },
    Timezone { name: "Europe/Helsinki" },
    Timezone { name: "Europe/Athens" },
    Timezone { name: "Europe/Moscow" },
    Timezone { name: "America/New_York" },
    Timezone { name: "America/Chicago" },
    Timezone { name: "America/Denver" },
    Timezone { name: "America/Los_Angeles" },
    Timezone { name: "America/Anchorage" },
    Timezone { name: "America/Sao_Paulo" },
    Timezone { name: "America/Mexico_City" },
    Timezone { name: "America/Toronto" },
    Timezone { name: "Asia/Shanghai" },
    Timezone { name: "Asia/Tokyo" },
    Timezone { name: "Asia/Seoul" },
    Timezone { name: "Asia/Hong_Kong" },
    Timezone { name: "Asia/Singapore" },
    Timezone { name: "Asia/Kolkata" },
    Timezone { name: "Asia/Dubai" },
    Timezone { name: "Australia/Sydney" },
    Timezone { name: "Australia/Perth" },
    Timezone { name: "Pacific/Auckland" },
];

/// Iterator over the advertised names, in form order.
pub fn timezone_names() -> impl Iterator<Item = &'static str> {
    TIMEZONES.iter().map(|tz| tz.name)
}
