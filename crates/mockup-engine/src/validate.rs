use std::collections::BTreeMap;

use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};

const MIN_OVERLAY_CHARS: usize = 20;

/// Field-level validation failures, serialized into the 400 response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub form_errors: Vec<String>,
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    fn form(message: &str) -> Self {
        Self {
            form_errors: vec![message.to_string()],
            field_errors: BTreeMap::new(),
        }
    }

    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.field_errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.form_errors.is_empty() && self.field_errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateBaseImageInput {
    pub product_name: String,
    pub product_handle: Option<String>,
    pub product_type: Option<String>,
    pub view_id: String,
    pub decoration_method: Option<String>,
    pub style_hint: Option<String>,
}

impl GenerateBaseImageInput {
    pub fn parse(body: &[u8]) -> Result<Self, ValidationErrors> {
        let object = json_object(body)?;
        let mut fields = FieldReader::new(&object);

        let product_name = fields.required("product_name");
        let product_handle = fields.optional_non_empty("product_handle");
        let product_type = fields.optional("product_type");
        let view_id = fields.required("view_id");
        let decoration_method = fields.optional("decoration_method");
        let style_hint = fields.optional("style_hint");
        fields.finish()?;

        Ok(Self {
            product_name: product_name.unwrap_or_default(),
            product_handle,
            product_type,
            view_id: view_id.unwrap_or_default(),
            decoration_method,
            style_hint,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceMockupInput {
    pub product_handle: Option<String>,
    pub view_id: Option<String>,
    pub base_image_url: String,
    pub overlay_png_base64: String,
    pub decoration_method: String,
    pub location: String,
}

impl EnhanceMockupInput {
    pub fn parse(body: &[u8]) -> Result<Self, ValidationErrors> {
        let object = json_object(body)?;
        let mut fields = FieldReader::new(&object);

        let product_handle = fields.optional("product_handle");
        let view_id = fields.optional("view_id");
        let base_image_url = fields.required("base_image_url");
        if let Some(url) = base_image_url.as_deref() {
            if !is_fetchable_url(url) {
                fields.errors.add("base_image_url", "Invalid url");
            }
        }
        let overlay_png_base64 = fields.required("overlay_png_base64");
        if let Some(overlay) = overlay_png_base64.as_deref() {
            if overlay.chars().count() < MIN_OVERLAY_CHARS {
                fields.errors.add(
                    "overlay_png_base64",
                    format!("String must contain at least {MIN_OVERLAY_CHARS} character(s)"),
                );
            }
        }
        let decoration_method = fields.required("decoration_method");
        let location = fields.required("location");
        fields.finish()?;

        Ok(Self {
            product_handle,
            view_id,
            base_image_url: base_image_url.unwrap_or_default(),
            overlay_png_base64: overlay_png_base64.unwrap_or_default(),
            decoration_method: decoration_method.unwrap_or_default(),
            location: location.unwrap_or_default(),
        })
    }
}

fn json_object(body: &[u8]) -> Result<Map<String, Value>, ValidationErrors> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(object)) => Ok(object),
        _ => Err(ValidationErrors::form("Expected a JSON object body")),
    }
}

fn is_fetchable_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    errors: ValidationErrors,
}

impl<'a> FieldReader<'a> {
    fn new(object: &'a Map<String, Value>) -> Self {
        Self {
            object,
            errors: ValidationErrors::default(),
        }
    }

    fn string(&mut self, field: &str) -> Option<String> {
        match self.object.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(_) => {
                self.errors.add(field, "Expected string");
                None
            }
        }
    }

    fn required(&mut self, field: &str) -> Option<String> {
        let present = self.object.get(field).is_some_and(|value| !value.is_null());
        let value = self.optional_non_empty(field);
        if value.is_none() && !present {
            self.errors.add(field, "Required");
        }
        value
    }

    fn optional(&mut self, field: &str) -> Option<String> {
        self.string(field)
    }

    fn optional_non_empty(&mut self, field: &str) -> Option<String> {
        let value = self.string(field);
        if value.as_deref() == Some("") {
            self.errors
                .add(field, "String must contain at least 1 character(s)");
            return None;
        }
        value
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
