//! Shared page scaffolding and formatting helpers.

pub const HTML_HEADER: &str = "<!DOCTYPE html>\
<html><head><title>RD Dongle</title>\
<meta name='viewport' content='width=device-width, initial-scale=1'>\
<style>body{font-family:sans-serif;margin:1em}\
.box{border:1px solid #ccc;border-radius:4px;padding:0.5em 1em;margin:0.8em 0}\
table.info th{text-align:left;padding-right:1em}</style>\
</head><body><h1>RD Dongle</h1>";

pub const HTML_FOOTER: &str = "</body></html>";

pub const HTML_NO_CONNECTION_BODY: &str = "<div class='box'>\
<h2>No Power Supply</h2>\
<p>The power supply did not answer on the serial port. Check the cable \
and the configured baud rate, then reboot the dongle.</p></div>";

pub fn info_row(key: &str, value: &str) -> String {
    format!("<tr><th>{key}</th><td>{value}</td></tr>")
}

pub fn open_box(title: &str, link: Option<(&str, &str)>) -> String {
    let link = link
        .map(|(href, text)| format!("<a style='float:right' href='{href}'>{text}</a>"))
        .unwrap_or_default();
    format!("<div class='box'>{link}<h2>{title}</h2><table class='info'><tbody>")
}

pub fn close_box() -> &'static str {
    "</tbody></table></div>"
}

pub fn voltage_to_string(voltage: f64) -> String {
    if voltage < 1.0 {
        format!("{:.0} mV", voltage * 1000.0)
    } else {
        format!("{voltage:.3} V")
    }
}

pub fn current_to_string(current: f64) -> String {
    if current < 1.0 {
        format!("{:.0} mA", current * 1000.0)
    } else {
        format!("{current:.3} A")
    }
}

pub fn power_to_string(power: f64) -> String {
    if power < 1.0 {
        format!("{:.0} mW", power * 1000.0)
    } else {
        format!("{power:.3} W")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_quantities_render_in_milliunits() {
        assert_eq!(voltage_to_string(0.5), "500 mV");
        assert_eq!(voltage_to_string(24.0), "24.000 V");
        assert_eq!(current_to_string(0.099), "99 mA");
        assert_eq!(power_to_string(11.9), "11.900 W");
    }
}
