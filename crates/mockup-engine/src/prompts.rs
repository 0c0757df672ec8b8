#[derive(Debug, Clone, Default)]
pub struct BaseImagePromptArgs<'a> {
    pub product_name: &'a str,
    pub product_type: Option<&'a str>,
    pub view_id: &'a str,
    pub decoration_method: Option<&'a str>,
    pub style_hint: Option<&'a str>,
}

/// Clean studio shot of the blank product: no person, consistent lighting.
pub fn base_image_prompt(args: &BaseImagePromptArgs<'_>) -> String {
    let product_type = present(args.product_type)
        .map(|value| format!(" (type: {value})"))
        .unwrap_or_default();
    let lines = [
        "Create a clean studio product photo for a customizable promotional product.".to_string(),
        format!("Product name: {}{product_type}.", args.product_name),
        format!("View: {}.", args.view_id),
        present(args.decoration_method)
            .map(|value| format!("Decoration method context: {value}."))
            .unwrap_or_default(),
        "No person, no hands, no mannequin.".to_string(),
        "Plain neutral background, soft shadow, high clarity.".to_string(),
        "Make the product angle match the requested view, and frame tightly to show the decoration area clearly.".to_string(),
        present(args.style_hint)
            .map(|value| format!("Style hint: {value}"))
            .unwrap_or_default(),
    ];
    join_non_empty(&lines)
}

pub fn enhance_prompt(decoration_method: &str, location: &str) -> String {
    let lines = [
        "You are creating a realistic product proof mockup for print production.".to_string(),
        "Apply the provided design overlay onto the product image.".to_string(),
        format!("Decoration method: {decoration_method}."),
        format!("Location: {location}."),
        "Make the design look physically printed/embroidered/engraved as appropriate (ink texture, stitch texture, or engraving depth).".to_string(),
        "Preserve the logo/text faithfully (no changes).".to_string(),
        "Maintain realistic lighting, perspective, and material interaction.".to_string(),
        "Do not add extra text or watermarks.".to_string(),
    ];
    join_non_empty(&lines)
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.is_empty())
}

fn join_non_empty(lines: &[String]) -> String {
    lines
        .iter()
        .filter(|line| !line.is_empty())
        .map(String::as_str)
        .collect::<Vec<&str>>()
        .join(" ")
}
