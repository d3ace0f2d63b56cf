//! Tickets raised by Executa customers against the platform itself.
//!
//! These go straight to the Executa support inbox by email and are not
//! stored.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EmailConfig;
use crate::error::{ExecutaError, ExecutaResult};
use crate::models::User;
use crate::notify::email::escape_html;
use crate::notify::{EmailMessage, Notifier};

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupportTicketRequest {
    pub subject: String,
    pub category: String,
    pub priority: String,
    pub description: String,
    pub user_email: String,
    pub user_name: String,
}

impl SupportTicketRequest {
    fn validate(&self) -> ExecutaResult<()> {
        let required = [
            &self.subject,
            &self.category,
            &self.description,
            &self.user_email,
            &self.user_name,
        ];
        if required.iter().any(|field| field.trim().is_empty()) {
            return Err(ExecutaError::validation("All fields are required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicketReceipt {
    pub ticket_id: String,
    pub message: String,
}

/// `EXEC-{unix millis}-{5 base36 chars}`.
pub fn generate_ticket_id() -> String {
    let mut n = Uuid::new_v4().as_u128();
    let suffix: String = (0..5)
        .map(|_| {
            let c = BASE36[(n % 36) as usize] as char;
            n /= 36;
            c
        })
        .collect();
    format!("EXEC-{}-{}", Utc::now().timestamp_millis(), suffix)
}

pub fn priority_emoji(priority: &str) -> &'static str {
    match priority {
        "LOW" => "🟢",
        "NORMAL" => "🟡",
        "HIGH" => "🟠",
        "URGENT" => "🔴",
        _ => "⚪",
    }
}

pub fn category_label(category: &str) -> &str {
    match category {
        "technical" => "Technical Issue",
        "billing" => "Billing & Plans",
        "feature-request" => "Feature Request",
        "account" => "Account Management",
        "integration" => "Integration Help",
        "general" => "General Question",
        "bug-report" => "Bug Report",
        other => other,
    }
}

fn team_email(
    ticket_id: &str,
    request: &SupportTicketRequest,
    caller: &User,
    to: &str,
    from: &str,
) -> EmailMessage {
    let emoji = priority_emoji(&request.priority);
    let category = category_label(&request.category);
    let submitted = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background: #1D4ED8; color: white; padding: 20px; border-radius: 8px 8px 0 0;">
    <h1 style="margin: 0; font-size: 24px;">New Support Ticket</h1>
    <p style="margin: 5px 0 0 0;">Ticket ID: {ticket_id}</p>
  </div>
  <div style="background: #f8fafc; padding: 20px; border: 1px solid #e2e8f0; border-top: none;">
    <h3>Customer Information</h3>
    <p><strong>Name:</strong> {name}</p>
    <p><strong>Email:</strong> {email}</p>
    <p><strong>Account ID:</strong> {account_id}</p>
    <p><strong>User ID:</strong> {user_id}</p>
    <h3>Ticket Details</h3>
    <p><strong>Category:</strong> {category}</p>
    <p><strong>Priority:</strong> {emoji} {priority}</p>
    <p><strong>Submitted:</strong> {submitted}</p>
    <h3>Subject</h3>
    <p>{subject}</p>
    <h3>Description</h3>
    <p style="white-space: pre-wrap;">{description}</p>
  </div>
  <div style="background: #1f2937; color: white; padding: 16px; border-radius: 0 0 8px 8px; text-align: center;">
    <p style="margin: 0; font-size: 12px;">This ticket was automatically generated from the Executa platform.
    Please respond directly to this email to assist the customer.</p>
  </div>
</div>"#,
        name = escape_html(&request.user_name),
        email = escape_html(&request.user_email),
        account_id = caller.account_id,
        user_id = caller.id,
        category = escape_html(category),
        priority = escape_html(&request.priority),
        subject = escape_html(&request.subject),
        description = escape_html(&request.description),
    );

    let text = format!(
        "New Support Ticket: {ticket_id}\n\n\
         Customer Information:\n\
         - Name: {name}\n\
         - Email: {email}\n\
         - Account ID: {account_id}\n\
         - User ID: {user_id}\n\n\
         Ticket Details:\n\
         - Category: {category}\n\
         - Priority: {priority}\n\
         - Submitted: {submitted}\n\n\
         Subject: {subject}\n\n\
         Description:\n{description}\n\n\
         ---\n\
         This ticket was automatically generated from the Executa platform.\n\
         Please respond directly to this email to assist the customer.\n",
        name = request.user_name,
        email = request.user_email,
        account_id = caller.account_id,
        user_id = caller.id,
        priority = request.priority,
        subject = request.subject,
        description = request.description,
    );

    EmailMessage {
        to: to.to_string(),
        from: from.to_string(),
        subject: format!("[{}] {} {}", ticket_id, emoji, request.subject),
        html,
        text,
        reference: None,
    }
}

fn confirmation_email(ticket_id: &str, request: &SupportTicketRequest, from: &str) -> EmailMessage {
    let submitted = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let response_times = "Our typical response time is within 24 hours for normal priority tickets. \
                          If you marked your ticket as urgent, we'll aim to respond within 4 hours.";

    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background: #059669; color: white; padding: 20px; border-radius: 8px 8px 0 0;">
    <h1 style="margin: 0; font-size: 24px;">Support Ticket Received</h1>
    <p style="margin: 5px 0 0 0;">We've got your message!</p>
  </div>
  <div style="background: #f8fafc; padding: 20px; border: 1px solid #e2e8f0; border-top: none;">
    <p>Hi {name},</p>
    <p>Thank you for contacting Executa support. We've received your support ticket and our team will review it shortly.</p>
    <p><strong>Ticket ID:</strong> {ticket_id}<br><strong>Subject:</strong> {subject}<br><strong>Submitted:</strong> {submitted}</p>
    <p>{response_times}</p>
    <p>If you need to add additional information to your ticket, simply reply to this email.</p>
  </div>
</div>"#,
        name = escape_html(&request.user_name),
        subject = escape_html(&request.subject),
    );

    let text = format!(
        "Hi {name},\n\n\
         Thank you for contacting Executa support. We've received your support ticket and our team will review it shortly.\n\n\
         Ticket Details:\n\
         - Ticket ID: {ticket_id}\n\
         - Subject: {subject}\n\
         - Submitted: {submitted}\n\n\
         {response_times}\n\n\
         If you need to add additional information to your ticket, simply reply to this email.\n\n\
         Best regards,\n\
         The Executa Support Team\n",
        name = request.user_name,
        subject = request.subject,
    );

    EmailMessage {
        to: request.user_email.clone(),
        from: from.to_string(),
        subject: format!("Ticket Received: {} [{}]", request.subject, ticket_id),
        html,
        text,
        reference: None,
    }
}

pub struct SupportService {
    notifier: Arc<Notifier>,
    support_email: String,
    from_email: String,
}

impl SupportService {
    pub fn new(notifier: Arc<Notifier>, config: &EmailConfig) -> Self {
        Self {
            notifier,
            support_email: config.support_email.clone(),
            from_email: config.from_email.clone(),
        }
    }

    /// Mails the support team, then the submitter. Only the first send can
    /// fail the request.
    pub async fn submit(
        &self,
        caller: &User,
        request: &SupportTicketRequest,
    ) -> ExecutaResult<SupportTicketReceipt> {
        request.validate()?;
        let ticket_id = generate_ticket_id();

        let to_team = team_email(&ticket_id, request, caller, &self.support_email, &self.from_email);
        if let Err(e) = self.notifier.email().send(&to_team).await {
            error!(ticket_id = %ticket_id, error = %e, "Failed to email Executa support");
            return Err(e);
        }

        let confirmation = confirmation_email(&ticket_id, request, &self.from_email);
        if let Err(e) = self.notifier.email().send(&confirmation).await {
            warn!(ticket_id = %ticket_id, error = %e, "Failed to send support ticket confirmation");
        }

        info!(ticket_id = %ticket_id, user_id = %caller.id, category = %request.category, "Support ticket submitted");
        Ok(SupportTicketReceipt {
            ticket_id,
            message: "Support ticket submitted successfully".to_string(),
        })
    }
}
