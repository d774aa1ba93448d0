//! Fixed pt-BR phrases spoken by the assistant

use chrono::{Local, Timelike};

/// Every spoken fallback the controller can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrase {
    /// Activation without authentication
    Greeting,
    /// Voice recognized
    AuthGreeting,
    AuthRejected,
    /// Authentication could not be carried out
    AuthError,
    AuthenticateFirst,
    /// The backend refused the command
    CommandFailed,
    GenericError,
}

#[derive(Debug, Clone)]
pub struct Phrasebook {
    name: String,
}

impl Phrasebook {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn render(&self, phrase: Phrase) -> String {
        self.render_at(phrase, Local::now().hour())
    }

    /// Render with an explicit local hour (0-23)
    pub fn render_at(&self, phrase: Phrase, hour: u32) -> String {
        match phrase {
            Phrase::Greeting => {
                format!("Olá {}! {} Como posso ajudar?", self.name, time_of_day(hour))
            }
            Phrase::AuthGreeting => {
                format!("Voz reconhecida! Olá {}, como posso ajudar?", self.name)
            }
            Phrase::AuthRejected => "Desculpe, não reconheci sua voz. Tente novamente.".to_string(),
            Phrase::AuthError => "Erro na autenticação. Tente novamente.".to_string(),
            Phrase::AuthenticateFirst => {
                "Por favor, autentique-se primeiro dizendo \"IA\".".to_string()
            }
            Phrase::CommandFailed => "Desculpe, não consegui processar seu comando.".to_string(),
            Phrase::GenericError => "Ocorreu um erro. Tente novamente.".to_string(),
        }
    }
}

fn time_of_day(hour: u32) -> &'static str {
    match hour {
        0..=11 => "Bom dia!",
        12..=17 => "Boa tarde!",
        _ => "Boa noite!",
    }
}
