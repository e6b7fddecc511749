use super::{normalize_vin, VehicleExtractor, VehicleRecord};
use crate::discovery::{find_typed_object, json_ld_values};
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

/// Reads vehicles from schema.org `Car`/`Vehicle` JSON-LD blocks
#[derive(Debug, Clone)]
pub struct JsonLdExtractor {
    types: Vec<String>,
}

impl JsonLdExtractor {
    /// Creates an extractor accepting the given `@type` values
    pub fn new(types: Vec<String>) -> Self {
        Self { types }
    }
}

impl Default for JsonLdExtractor {
    fn default() -> Self {
        Self::new(vec!["Car".to_string(), "Vehicle".to_string()])
    }
}

impl VehicleExtractor for JsonLdExtractor {
    fn extract_vehicle(&self, document: &Html, url: &Url) -> Option<VehicleRecord> {
        let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

        json_ld_values(document, &selector)
            .iter()
            .filter_map(|value| find_typed_object(value, &self.types))
            .find_map(|object| {
                let record = build_record(object, url);
                if record.is_none() {
                    debug!("Vehicle JSON-LD on {} has no usable VIN", url);
                }
                record
            })
    }
}

/// Maps one schema.org vehicle object onto a record
fn build_record(data: &Map<String, Value>, url: &Url) -> Option<VehicleRecord> {
    let vin = first_string(data, &["vehicleIdentificationNumber", "vin"])
        .and_then(|raw| normalize_vin(&raw))?;

    let mut fields = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value.filter(is_present) {
            fields.insert(key.to_string(), value);
        }
    };

    put("year", first_value(data, &["vehicleModelDate", "modelYear"]));
    put(
        "make",
        named(data.get("manufacturer"))
            .filter(is_present)
            .or_else(|| named(data.get("brand"))),
    );
    put("model", named(data.get("model")));
    put("trim", first_value(data, &["vehicleConfiguration", "trim"]));
    put("mileage", mileage(data.get("mileageFromOdometer")));
    put("price", offer_price(data.get("offers")).or_else(|| data.get("price").cloned()));
    put("body_type", data.get("bodyType").cloned());
    put("transmission", named(data.get("vehicleTransmission")));
    put("drivetrain", named(data.get("driveWheelConfiguration")));
    put("fuel_type", named(data.get("fuelType")));
    put("exterior_color", data.get("color").cloned());
    put("description", data.get("description").cloned());
    put("images", images(data.get("image")));

    Some(VehicleRecord {
        vin,
        url: url.to_string(),
        source: None,
        fields,
    })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn first_value(data: &Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|key| data.get(*key))
        .find(|value| is_present(value))
        .cloned()
}

fn first_string(data: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first_value(data, keys).and_then(|value| match value {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// `{"name": x}` yields x; scalars are used as they are
fn named(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Object(object) => object.get("name").cloned(),
        Value::Array(_) | Value::Null => None,
        scalar => Some(scalar.clone()),
    }
}

/// `QuantitativeValue` objects yield their `value`
fn mileage(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Object(object) => object.get("value").cloned(),
        scalar => Some(scalar.clone()),
    }
}

/// Price of the first offer; `offers` may be a single object or a list
fn offer_price(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Object(offer) => offer.get("price").cloned(),
        Value::Array(offers) => offers
            .iter()
            .filter_map(|offer| offer.get("price"))
            .find(|price| is_present(price))
            .cloned(),
        _ => None,
    }
}

/// Image URLs; entries may be strings or `ImageObject`s
fn images(value: Option<&Value>) -> Option<Value> {
    let image_url = |item: &Value| match item {
        Value::String(s) => Some(Value::String(s.clone())),
        Value::Object(object) => object.get("url").cloned(),
        _ => None,
    };

    let urls: Vec<Value> = match value? {
        Value::Array(items) => items.iter().filter_map(image_url).collect(),
        single => image_url(single).into_iter().collect(),
    };

    Some(Value::Array(urls))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(json: &str) -> Html {
        Html::parse_document(&format!(
            r#"<html><head><script type="application/ld+json">{}</script></head><body></body></html>"#,
            json
        ))
    }

    fn url() -> Url {
        Url::parse("https://dealer.test/vehicle/1").unwrap()
    }

    #[test]
    fn test_extracts_schema_org_car() {
        let doc = page(
            r#"{
                "@context": "https://schema.org",
                "@type": "Car",
                "vehicleIdentificationNumber": "1hgcm82633a004352",
                "vehicleModelDate": "2021",
                "manufacturer": {"@type": "Organization", "name": "Honda"},
                "model": {"name": "Accord"},
                "vehicleConfiguration": "EX-L",
                "mileageFromOdometer": {"@type": "QuantitativeValue", "value": 12000, "unitCode": "SMI"},
                "offers": {"@type": "Offer", "price": 24995, "priceCurrency": "USD"},
                "bodyType": "Sedan",
                "vehicleTransmission": {"name": "Automatic"},
                "driveWheelConfiguration": "FWD",
                "fuelType": "Gasoline",
                "color": "Blue",
                "image": ["https://img.test/1.jpg", {"url": "https://img.test/2.jpg"}]
            }"#,
        );

        let record = JsonLdExtractor::default()
            .extract_vehicle(&doc, &url())
            .unwrap();

        assert_eq!(record.vin, "1HGCM82633A004352");
        assert_eq!(record.url, "https://dealer.test/vehicle/1");
        assert_eq!(record.fields["year"], "2021");
        assert_eq!(record.fields["make"], "Honda");
        assert_eq!(record.fields["model"], "Accord");
        assert_eq!(record.fields["trim"], "EX-L");
        assert_eq!(record.fields["mileage"], 12000);
        assert_eq!(record.fields["price"], 24995);
        assert_eq!(record.fields["transmission"], "Automatic");
        assert_eq!(record.fields["drivetrain"], "FWD");
        assert_eq!(record.fields["exterior_color"], "Blue");
        assert_eq!(
            record.fields["images"],
            serde_json::json!(["https://img.test/1.jpg", "https://img.test/2.jpg"])
        );
        assert!(!record.fields.contains_key("description"));
    }

    #[test]
    fn test_fallback_keys() {
        let doc = page(
            r#"{"@type": "Vehicle", "vin": "1FTEW1EP5KFA12345", "modelYear": 2019,
                "brand": {"name": "Ford"}, "model": "F-150", "price": "31000",
                "image": "https://img.test/f150.jpg"}"#,
        );

        let record = JsonLdExtractor::default()
            .extract_vehicle(&doc, &url())
            .unwrap();

        assert_eq!(record.vin, "1FTEW1EP5KFA12345");
        assert_eq!(record.fields["year"], 2019);
        assert_eq!(record.fields["make"], "Ford");
        assert_eq!(record.fields["model"], "F-150");
        assert_eq!(record.fields["price"], "31000");
        assert_eq!(record.fields["images"], serde_json::json!(["https://img.test/f150.jpg"]));
    }

    #[test]
    fn test_vehicle_inside_graph() {
        let doc = page(
            r#"{"@graph": [{"@type": "AutoDealer", "name": "Main St"},
                           {"@type": "Car", "vin": "1HGCM82633A004352"}]}"#,
        );
        let record = JsonLdExtractor::default().extract_vehicle(&doc, &url());
        assert_eq!(record.unwrap().vin, "1HGCM82633A004352");
    }

    #[test]
    fn test_missing_or_bad_vin() {
        let extractor = JsonLdExtractor::default();
        assert!(extractor
            .extract_vehicle(&page(r#"{"@type": "Car", "name": "Accord"}"#), &url())
            .is_none());
        assert!(extractor
            .extract_vehicle(&page(r#"{"@type": "Car", "vin": "TOO-SHORT"}"#), &url())
            .is_none());
    }

    #[test]
    fn test_non_vehicle_json_ld() {
        let doc = page(r#"{"@type": "Organization", "vin": "1HGCM82633A004352"}"#);
        assert!(JsonLdExtractor::default().extract_vehicle(&doc, &url()).is_none());
    }
}
