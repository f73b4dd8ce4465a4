//! 邮件模板
//!
//! 硬编码模板，按通知类型生成主题与正文。正文同时提供纯文本和 HTML 两种格式，
//! 订单字段缺失时使用占位文字，不让模板渲染失败阻断通知。

use crate::models::Order;

use super::NotificationKind;

/// 渲染结果
#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// 最小货币单位转为展示金额：49900 paise -> ₹499.00
pub fn format_amount(amount: i64, currency: &str) -> String {
    let symbol = match currency {
        "INR" => "₹",
        "USD" => "$",
        other => return format!("{other} {}.{:02}", amount / 100, (amount % 100).abs()),
    };
    format!("{symbol}{}.{:02}", amount / 100, (amount % 100).abs())
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn tracking_line(order: &Order) -> Option<String> {
    let awb = order.shipment.awb_code.as_deref()?;
    Some(match order.shipment.courier_name.as_deref() {
        Some(courier) => format!("Tracking number: {awb} ({courier})"),
        None => format!("Tracking number: {awb}"),
    })
}

fn refund_amount(order: &Order) -> String {
    let amount = order.refund.as_ref().map(|r| r.amount).unwrap_or(order.total_amount);
    format_amount(amount, &order.currency)
}

/// 主题与正文段落
fn compose(kind: NotificationKind, order: &Order) -> (String, Vec<String>) {
    let number = &order.order_number;
    let mut lines = Vec::new();

    let subject = match kind {
        NotificationKind::OrderShipped => {
            lines.push(format!("Good news! Your order {number} has been shipped."));
            lines.extend(tracking_line(order));
            if let Some(etd) = order.shipment.etd {
                lines.push(format!("Expected delivery: {}", etd.format("%d %b %Y")));
            }
            format!("Your order {number} has shipped")
        }
        NotificationKind::OutForDelivery => {
            lines.push(format!("Your order {number} is out for delivery and will reach you today."));
            lines.extend(tracking_line(order));
            format!("Your order {number} is out for delivery")
        }
        NotificationKind::Delivered => {
            lines.push(format!("Your order {number} has been delivered. We hope you enjoy it!"));
            format!("Your order {number} has been delivered")
        }
        NotificationKind::DeliveryAttemptFailed => {
            lines.push(format!(
                "The courier could not deliver your order {number}. Another attempt will be made shortly."
            ));
            lines.push("Please make sure someone is available to receive the package.".to_string());
            format!("Delivery attempt failed for order {number}")
        }
        NotificationKind::ReturnInitiated => {
            lines.push(format!(
                "Your order {number} could not be delivered and is being returned to the seller."
            ));
            format!("Order {number} is being returned")
        }
        NotificationKind::Returned => {
            lines.push(format!("Your order {number} has been returned to the seller."));
            format!("Order {number} returned")
        }
        NotificationKind::Cancelled => {
            lines.push(format!("Your order {number} has been cancelled."));
            if let Some(cancellation) = &order.cancellation {
                lines.push(format!("Reason: {}", cancellation.reason));
            }
            format!("Order {number} cancelled")
        }
        NotificationKind::ShipmentLost => {
            lines.push(format!(
                "We are sorry, the courier has reported your order {number} as lost in transit."
            ));
            lines.push("Our team will contact you about a replacement or refund.".to_string());
            format!("Update on your order {number}")
        }
        NotificationKind::RefundInitiated => {
            lines.push(format!(
                "A refund of {} for order {number} has been initiated.",
                refund_amount(order)
            ));
            lines.push("It usually reaches your original payment method within 5-7 business days.".to_string());
            format!("Refund initiated for order {number}")
        }
        NotificationKind::RefundProcessed => {
            lines.push(format!(
                "Your refund of {} for order {number} has been processed.",
                refund_amount(order)
            ));
            format!("Refund processed for order {number}")
        }
        NotificationKind::RefundFailed => {
            lines.push(format!(
                "We could not process the refund for order {number}. Our support team will reach out to you."
            ));
            format!("Refund issue with order {number}")
        }
    };

    (subject, lines)
}

/// 渲染邮件内容
pub fn render(kind: NotificationKind, order: &Order) -> EmailContent {
    let (subject, lines) = compose(kind, order);
    let greeting = format!("Hi {},", order.customer.name);

    let text = std::iter::once(greeting.clone())
        .chain(lines.iter().cloned())
        .chain(std::iter::once("Thank you for shopping with us.".to_string()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let html = std::iter::once(greeting)
        .chain(lines)
        .chain(std::iter::once("Thank you for shopping with us.".to_string()))
        .map(|line| format!("<p>{}</p>", escape_html(&line)))
        .collect::<String>();

    EmailContent {
        subject,
        text,
        html: format!("<html><body>{html}</body></html>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerContact, PaymentMethod, RefundLedger, RefundStatus, ShipmentInfo};
    use chrono::Utc;

    fn order() -> Order {
        Order::new(
            "ORD-1001",
            "vendor-1",
            CustomerContact {
                id: "c1".to_string(),
                name: "Ravi <R&D>".to_string(),
                email: Some("ravi@example.com".to_string()),
            },
            PaymentMethod::Prepaid,
            49_900,
        )
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(49_900, "INR"), "₹499.00");
        assert_eq!(format_amount(1_005, "USD"), "$10.05");
        assert_eq!(format_amount(250, "EUR"), "EUR 2.50");
    }

    #[test]
    fn test_shipped_includes_tracking() {
        let order = order().with_shipment(ShipmentInfo {
            awb_code: Some("AWB123".to_string()),
            courier_name: Some("Delhivery".to_string()),
            ..Default::default()
        });

        let content = render(NotificationKind::OrderShipped, &order);
        assert_eq!(content.subject, "Your order ORD-1001 has shipped");
        assert!(content.text.contains("Tracking number: AWB123 (Delhivery)"));
    }

    #[test]
    fn test_refund_amount_uses_ledger() {
        let mut order = order();
        order.refund = Some(RefundLedger {
            refund_id: Some("rfnd_1".to_string()),
            amount: 44_900,
            currency: "INR".to_string(),
            status: RefundStatus::Pending,
            reason: None,
            initiated_at: Utc::now(),
            processed_at: None,
            failure_reason: None,
            attempts: 1,
            idempotency_key: None,
        });

        let content = render(NotificationKind::RefundInitiated, &order);
        assert!(content.text.contains("₹449.00"));
    }

    #[test]
    fn test_html_is_escaped() {
        let content = render(NotificationKind::Delivered, &order());
        assert!(content.html.contains("Ravi &lt;R&amp;D&gt;"));
        assert!(!content.html.contains("<R&D>"));
        assert!(content.text.starts_with("Hi Ravi <R&D>,"));
    }
}
