use minijinja::{context, Environment};

use crate::types::{Channel, Order, Product};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");

pub const MAX_CONTEXT_PRODUCTS: usize = 10;
pub const MAX_CONTEXT_ORDERS: usize = 5;

pub struct SystemPromptContext<'a> {
    pub store_name: &'a str,
    pub persona: &'a str,
    pub store_context: &'a str,
    pub channel: Channel,
}

pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }

    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            store_name => display_store_name(ctx.store_name),
            persona => ctx.persona.trim(),
            store_context => ctx.store_context.trim(),
            channel_style => channel_style(ctx.channel),
        })
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut prompt = if ctx.persona.trim().is_empty() {
        format!(
            "You are a friendly and helpful customer service agent for {}.\n",
            display_store_name(ctx.store_name)
        )
    } else {
        format!("{}\n", ctx.persona.trim())
    };

    if !ctx.store_context.trim().is_empty() {
        prompt.push_str("\nStore information:\n");
        prompt.push_str(ctx.store_context.trim());
        prompt.push('\n');
    }

    prompt.push_str(
        "\nKeep replies short, warm and professional. Never invent facts or share \
         sensitive data. Offer a human agent when unsure.\n",
    );
    prompt.push_str(channel_style(ctx.channel));
    prompt.push('\n');
    prompt
}

fn display_store_name(name: &str) -> &str {
    let name = name.trim();
    if name.is_empty() {
        "our store"
    } else {
        name
    }
}

pub fn channel_style(channel: Channel) -> &'static str {
    match channel {
        Channel::Whatsapp => {
            "Format for WhatsApp: use *bold* and _italic_ sparingly, no markdown headings or tables."
        }
        Channel::WebChat => "Reply in plain text without any markdown formatting.",
    }
}

/// Product bullets and recent orders, as shown to the model.
pub fn store_context(products: &[Product], orders: &[Order]) -> String {
    let mut sections = Vec::new();
    if !products.is_empty() {
        let lines = products
            .iter()
            .take(MAX_CONTEXT_PRODUCTS)
            .map(|p| {
                let description = p.description.trim();
                if description.is_empty() {
                    format!("- {}: {:.2}", p.name, p.price)
                } else {
                    format!("- {}: {:.2} - {}", p.name, p.price, description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Available products:\n{lines}"));
    }
    if !orders.is_empty() {
        let lines = orders
            .iter()
            .take(MAX_CONTEXT_ORDERS)
            .map(|o| {
                format!(
                    "- Order #{}: {:.2} (status: {}, payment: {})",
                    o.order_number, o.total_amount, o.status, o.payment_status
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Customer's recent orders:\n{lines}"));
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn product(name: &str, price: f64, description: &str) -> Product {
        Product {
            id: name.to_lowercase(),
            store_id: "s1".into(),
            name: name.into(),
            price,
            description: description.into(),
            is_active: true,
        }
    }

    #[test]
    fn template_includes_persona_context_and_style() {
        let prompt = render_system_prompt(&SystemPromptContext {
            store_name: "Print Hub",
            persona: "You are Kofi, the Print Hub assistant.",
            store_context: "Available products:\n- Mug: 40.00",
            channel: Channel::Whatsapp,
        });
        assert!(prompt.starts_with("You are Kofi"));
        assert!(prompt.contains("- Mug: 40.00"));
        assert!(prompt.contains("*bold*"));
    }

    #[test]
    fn default_persona_names_the_store() {
        let prompt = render_system_prompt(&SystemPromptContext {
            store_name: "",
            persona: "  ",
            store_context: "",
            channel: Channel::WebChat,
        });
        assert!(prompt.contains("customer service agent for our store"));
        assert!(prompt.contains("plain text"));
        assert!(!prompt.contains("Store information"));
    }

    #[test]
    fn fallback_matches_template_content() {
        let ctx = SystemPromptContext {
            store_name: "Print Hub",
            persona: "",
            store_context: "Available products:\n- Mug: 40.00",
            channel: Channel::WebChat,
        };
        let prompt = fallback_system_prompt(&ctx);
        assert!(prompt.contains("Print Hub"));
        assert!(prompt.contains("- Mug: 40.00"));
        assert!(prompt.contains("plain text"));
    }

    #[test]
    fn store_context_caps_products_and_orders() {
        let products = (0..12)
            .map(|i| product(&format!("P{i}"), 10.0, ""))
            .collect::<Vec<_>>();
        let orders = (0..7)
            .map(|i| Order {
                id: format!("o{i}"),
                customer_id: "c1".into(),
                order_number: format!("100{i}"),
                total_amount: 55.5,
                status: "shipped".into(),
                payment_status: "paid".into(),
                created_at: Utc::now(),
            })
            .collect::<Vec<_>>();
        let text = store_context(&products, &orders);
        assert_eq!(text.matches("- P").count(), 10);
        assert_eq!(text.matches("- Order #").count(), 5);
        assert!(text.contains("- Order #1000: 55.50 (status: shipped, payment: paid)"));
    }

    #[test]
    fn product_bullet_includes_description() {
        let text = store_context(&[product("Mug", 40.0, "Ceramic, 11oz")], &[]);
        assert_eq!(text, "Available products:\n- Mug: 40.00 - Ceramic, 11oz");
        assert_eq!(store_context(&[], &[]), "");
    }
}
